//! HTML rendering for the upload form and result pages.

use photomatch_core::types::ACCEPTED_EXTENSIONS;
use photomatch_core::VerdictReport;

const TITLE: &str = "PHOTO MATCHING APP";

/// Upload form: one reference photo, one test photo, one button.
pub fn upload_form() -> String {
    let accept = ACCEPTED_EXTENSIONS
        .iter()
        .map(|ext| format!(".{ext}"))
        .collect::<Vec<_>>()
        .join(",");

    layout(&format!(
        r#"<p>Upload one clear reference photo + one test photo and click the button.</p>
<form action="/compare" method="post" enctype="multipart/form-data">
  <label>Reference Image (clear face of the person)
    <input type="file" name="reference" accept="{accept}">
  </label>
  <label>Test Image (can have multiple people)
    <input type="file" name="gallery" accept="{accept}">
  </label>
  <button type="submit">Check Presence &amp; Similarity</button>
</form>"#
    ))
}

/// One-line verdict shown above the report.
pub fn verdict_banner(report: &VerdictReport) -> String {
    if report.person_present {
        format!("PERSON IS PRESENT (Similarity: {})", report.similarity_score)
    } else {
        format!("PERSON IS NOT PRESENT (Similarity: {})", report.similarity_score)
    }
}

/// Result page: verdict banner plus the report as pretty JSON.
pub fn result_page(report: &VerdictReport) -> String {
    let class = if report.person_present { "present" } else { "absent" };
    let json = serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string());

    layout(&format!(
        r#"<h2>Result</h2>
<p class="verdict {class}">{banner}</p>
<pre>{json}</pre>
<p><a href="/">Compare another pair</a></p>"#,
        banner = escape_html(&verdict_banner(report)),
        json = escape_html(&json),
    ))
}

pub fn error_page(message: &str) -> String {
    layout(&format!(
        r#"<p class="verdict error">{}</p>
<p><a href="/">Back</a></p>"#,
        escape_html(message)
    ))
}

fn layout(body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{TITLE}</title>
<style>
body {{ font-family: sans-serif; max-width: 40rem; margin: 2rem auto; }}
label {{ display: block; margin: 1rem 0; }}
button {{ width: 100%; padding: 0.75rem; }}
.verdict {{ padding: 0.75rem; border-radius: 0.25rem; }}
.present {{ background: #d4edda; }}
.absent, .error {{ background: #f8d7da; }}
pre {{ background: #f4f4f4; padding: 1rem; overflow-x: auto; }}
</style>
</head>
<body>
<h1>{TITLE}</h1>
{body}
<p><small>First run loads the model once. All future checks are instant.</small></p>
</body>
</html>
"#
    )
}

/// Escape text for inclusion in HTML element content.
fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
