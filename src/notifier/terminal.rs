use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::NotifyError;
use crate::model::NotificationPayload;
use crate::notifier::Notifier;

pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify<'a>(
        &'a self,
        payload: &'a NotificationPayload,
    ) -> BoxFuture<'a, Result<(), Report<NotifyError>>> {
        Box::pin(async move {
            tracing::warn!(
                channel = payload.channel_key,
                body = %payload.body,
                "ALERT: {}",
                payload.title,
            );
            Ok(())
        })
    }
}
