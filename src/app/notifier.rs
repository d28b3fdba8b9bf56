//! Outcome notifications for finished jobs.

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::domain::{
    AppError, EmailSend, Job, JobKind, JobPublisher, JobReport, QueueName, User, UserDirectory,
};

/// What happened to a notification attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// Email job published to the given address
    Sent { email: String },
    /// Recipient has notifications turned off
    Skipped,
    /// Publishing failed; logged and otherwise ignored
    Failed(String),
}

/// Composes and publishes an email job for every terminal job outcome
pub struct OutcomeNotifier {
    users: Arc<dyn UserDirectory>,
    publisher: Arc<dyn JobPublisher>,
    operator: User,
}

impl OutcomeNotifier {
    #[must_use]
    pub fn new(
        users: Arc<dyn UserDirectory>,
        publisher: Arc<dyn JobPublisher>,
        operator: User,
    ) -> Self {
        Self {
            users,
            publisher,
            operator,
        }
    }

    /// Never fails: lookup failures fall back to the operator and publish
    /// failures are only logged.
    #[instrument(skip(self, outcome), fields(kind = %kind, succeeded = outcome.is_ok()))]
    pub async fn notify(
        &self,
        user_name: &str,
        kind: JobKind,
        outcome: &Result<JobReport, AppError>,
    ) -> NotificationOutcome {
        match outcome {
            Ok(report) => info!(user = %user_name, detail = %report.detail, "Job succeeded"),
            Err(e) => error!(user = %user_name, error = %e, "Job failed"),
        }

        let user = match self.users.find_by_user_name(user_name).await {
            Ok(user) => user,
            Err(e) => {
                warn!(
                    user = %user_name,
                    error = %e,
                    operator = %self.operator.user_name,
                    "User lookup failed, notifying operator instead"
                );
                self.operator.clone()
            }
        };

        if !user.email_enabled {
            info!(user = %user.user_name, "Notifications disabled for user, skipping");
            return NotificationOutcome::Skipped;
        }

        let email = compose(&user, user_name, kind, outcome);
        match self
            .publisher
            .publish(QueueName::EmailSend, &Job::EmailSend(email))
            .await
        {
            Ok(()) => NotificationOutcome::Sent {
                email: user.email_address,
            },
            Err(e) => {
                error!(user = %user.user_name, error = %e, "Failed to publish notification");
                NotificationOutcome::Failed(e.to_string())
            }
        }
    }
}

fn compose(
    recipient: &User,
    user_name: &str,
    kind: JobKind,
    outcome: &Result<JobReport, AppError>,
) -> EmailSend {
    let (subject, content) = match outcome {
        Ok(report) => (
            format!("{} Processed Successfully", kind.label()),
            format!(
                "Your {} was successfully processed: {}",
                kind.label().to_lowercase(),
                report.detail
            ),
        ),
        Err(e) => (
            format!("{} Processing Failure", kind.label()),
            format!(
                "Your {} failed due to the following error: {}",
                kind.label().to_lowercase(),
                e
            ),
        ),
    };
    EmailSend {
        subject,
        content,
        content_type: "text/html".to_string(),
        user_names: vec![user_name.to_string()],
        emails: vec![recipient.email_address.clone()],
    }
}
