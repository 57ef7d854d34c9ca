//! Subscription controller.
//!
//! Servers do not keep subscriptions across connections, so the filter is
//! re-issued after every successful authentication.

use jobsync_shared::{ClientMessage, JobSubscription};

#[derive(Debug, Clone)]
pub struct SubscriptionController {
    subscription: JobSubscription,
    /// How many `subscribe_jobs` requests have been issued, across reconnects.
    issued: u64,
}

impl SubscriptionController {
    pub fn new(subscription: JobSubscription) -> Self {
        Self {
            subscription,
            issued: 0,
        }
    }

    pub fn current(&self) -> &JobSubscription {
        &self.subscription
    }

    pub fn issued(&self) -> u64 {
        self.issued
    }

    /// Build the single request owed to a freshly authenticated connection.
    pub fn on_authenticated(&mut self) -> ClientMessage {
        self.issue()
    }

    /// Swap the filter. Returns the request to send when the connection is
    /// already authenticated; otherwise the next `auth_success` picks it up.
    pub fn replace(&mut self, subscription: JobSubscription, authenticated: bool) -> Option<ClientMessage> {
        self.subscription = subscription;
        authenticated.then(|| self.issue())
    }

    fn issue(&mut self) -> ClientMessage {
        self.issued += 1;
        ClientMessage::subscribe(&self.subscription)
    }
}

impl Default for SubscriptionController {
    fn default() -> Self {
        Self::new(JobSubscription::all_active())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issues_one_request_per_authentication() {
        let mut controller = SubscriptionController::default();
        let first = controller.on_authenticated();
        let second = controller.on_authenticated();
        assert_eq!(first, second);
        assert_eq!(controller.issued(), 2);
        assert_eq!(
            first,
            ClientMessage::SubscribeJobs {
                job_types: None,
                job_ids: None,
                include_active_state: true,
            }
        );
    }

    #[test]
    fn replacement_waits_for_authentication() {
        let mut controller = SubscriptionController::default();
        let filter = JobSubscription::all_active().with_job_ids(["job-1"]);

        assert_eq!(controller.replace(filter.clone(), false), None);
        assert_eq!(controller.issued(), 0);
        assert_eq!(controller.current(), &filter);

        match controller.on_authenticated() {
            ClientMessage::SubscribeJobs { job_ids, .. } => {
                assert_eq!(job_ids, Some(vec!["job-1".to_string()]));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn replacement_sends_immediately_when_authenticated() {
        let mut controller = SubscriptionController::default();
        let filter = JobSubscription::all_active().with_job_types(["scan", "import"]);
        let msg = controller.replace(filter, true);
        assert!(matches!(
            msg,
            Some(ClientMessage::SubscribeJobs { job_types: Some(ref types), .. }) if types.len() == 2
        ));
        assert_eq!(controller.issued(), 1);
    }
}
