use std::sync::Arc;

use photomatch_core::{FaceMatcher, ImageAsset, PipelineError, PipelineOptions, ReadyToken, VerdictReport};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from HTTP handlers to the engine thread.
struct CompareRequest {
    reference: Option<ImageAsset>,
    candidate: Option<ImageAsset>,
    reply: oneshot::Sender<Result<VerdictReport, PipelineError>>,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<CompareRequest>,
}

impl EngineHandle {
    /// Run one comparison on the engine thread and wait for the verdict.
    pub async fn compare(
        &self,
        reference: Option<ImageAsset>,
        candidate: Option<ImageAsset>,
    ) -> Result<VerdictReport, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(CompareRequest {
                reference,
                candidate,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }
}

/// Spawn the comparison engine on a dedicated OS thread.
///
/// The token proves the matcher is initialized; the thread runs one
/// comparison at a time, in arrival order, until every handle is dropped.
pub fn spawn_engine(token: &ReadyToken, options: PipelineOptions) -> Result<EngineHandle, EngineError> {
    let matcher: Arc<dyn FaceMatcher> = token.shared_matcher();
    let (tx, mut rx) = mpsc::channel::<CompareRequest>(4);

    std::thread::Builder::new()
        .name("photomatch-engine".into())
        .spawn(move || {
            tracing::info!(staging_dir = %options.staging_dir.display(), "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                let result = photomatch_core::compare(
                    req.reference,
                    req.candidate,
                    matcher.as_ref(),
                    &options,
                );
                if let Err(e) = &result {
                    tracing::warn!(error = %e, "comparison failed");
                }
                let _ = req.reply.send(result);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}
