//! The notification mailer contract `pipeline::_finish` dispatches
//! against (§4.5). The real mailer is an external collaborator (§1); a
//! logging no-op implementation stands in for it here.

use async_trait::async_trait;

use crate::model::Pipeline;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn finished_pipeline(&self, pipeline: &Pipeline);
}

pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn finished_pipeline(&self, pipeline: &Pipeline) {
        tracing::info!(
            pipeline_id = pipeline.id,
            status = %pipeline.status,
            recipients = ?pipeline.recipients(),
            "pipeline finished"
        );
    }
}
