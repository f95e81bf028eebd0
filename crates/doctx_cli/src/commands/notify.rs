//! Notify command: the email-notification workflow.
//!
//! Whenever an email is sent to a client, one transaction
//!
//! 1. increments `followups` on the account (or customer) document,
//! 2. sets its `lastInteraction` to the current time,
//! 3. appends an `EMAIL` event to the matching events document.
//!
//! The email is sent from inside the transaction logic, so a retried
//! attempt sends it again.

use super::scenario::Scenario;
use super::seed::seed;
use super::ClusterArgs;
use doctx_core::{
    now_millis, AttemptError, Cluster, Collection, CoreError, DurabilityLevel,
    TransactionConfig, TransactionFailed, TransactionResult, Transactions,
};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Options of one notify run.
#[derive(Debug, Clone)]
pub struct NotifyOptions {
    /// Documents to update.
    pub scenario: Scenario,
    /// Email body.
    pub message: String,
    /// Durability of the transaction's writes.
    pub durability: DurabilityLevel,
    /// Transaction expiration.
    pub timeout: Duration,
    /// Fail after both writes.
    pub force_rollback: bool,
}

/// Sends emails.
pub trait Notifier {
    /// Sends `message` to `recipient`.
    fn send_email(
        &self,
        recipient: &str,
        message: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Pretends to send by logging the request.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send_email(
        &self,
        recipient: &str,
        _message: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!("HTTP Request: Sending an email to the client {recipient}...");
        Ok(())
    }
}

/// A document does not have the shape the workflow expects.
#[derive(Debug, Error)]
pub enum ShapeError {
    /// The document is not a JSON object.
    #[error("document {key} is not a JSON object")]
    NotAnObject {
        /// Document key.
        key: String,
    },
    /// A field has the wrong type.
    #[error("field {field} of {key} must be {expected}")]
    WrongType {
        /// Document key.
        key: String,
        /// Field name.
        field: &'static str,
        /// Expected JSON type.
        expected: &'static str,
    },
}

/// Failure of the notify workflow.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Seeding or setting up the transaction failed.
    #[error(transparent)]
    Core(#[from] CoreError),
    /// The transaction did not commit.
    #[error(transparent)]
    Transaction(#[from] TransactionFailed),
}

/// Runs the notify command.
pub fn run(args: &ClusterArgs, options: &NotifyOptions) -> Result<(), Box<dyn std::error::Error>> {
    let cluster = args.connect()?;
    let collection = cluster.bucket(&args.bucket)?.default_collection();
    let outcome = notify(&cluster, &collection, options, &LogNotifier);
    cluster.close()?;

    match outcome {
        Ok(result) => {
            println!(
                "✓ Recorded email to {} in {} attempt(s), {:?}",
                options.scenario.primary_key,
                result.attempts.len(),
                result.elapsed
            );
            if !result.unstaging_complete {
                println!("  some documents are still staged; run `doctx cleanup` to finish them");
            }
            Ok(())
        }
        Err(NotifyError::Transaction(failed)) => {
            for entry in failed.result().log() {
                eprintln!("{entry}");
            }
            Err(failed.into())
        }
        Err(err) => Err(err.into()),
    }
}

/// Seeds the scenario and runs the notification transaction.
pub fn notify(
    cluster: &Cluster,
    collection: &Collection,
    options: &NotifyOptions,
    notifier: &dyn Notifier,
) -> Result<TransactionResult, NotifyError> {
    let scenario = &options.scenario;
    seed(collection, scenario)?;

    let config = TransactionConfig::default()
        .durability_level(options.durability)
        .expiration(options.timeout);
    let transactions = Transactions::create(cluster, config)?;

    let result = transactions.run(|ctx| {
        info!(
            "Starting transaction for {} {} and {}Evt {}",
            scenario.doc_type, scenario.primary_key, scenario.doc_type, scenario.events_key
        );
        let primary = ctx.get_or_error(collection, scenario.primary_key)?;
        let events = ctx.get_or_error(collection, scenario.events_key)?;

        let mut primary_content = primary.content().clone();
        let mut events_content = events.content().clone();

        let recipient = primary_content
            .get("email")
            .and_then(Value::as_str)
            .unwrap_or(scenario.primary_key)
            .to_string();
        notifier
            .send_email(&recipient, &options.message)
            .map_err(AttemptError::Application)?;

        record_email(
            scenario,
            &mut primary_content,
            &mut events_content,
            &options.message,
            now_millis(),
        )
        .map_err(AttemptError::application)?;

        ctx.replace(&primary, &primary_content)?;
        ctx.replace(&events, &events_content)?;

        if options.force_rollback {
            return Err(AttemptError::application("Emulating a rollback"));
        }
        Ok(())
    })?;

    Ok(result)
}

/// Applies one sent email to the in-memory documents.
pub fn record_email(
    scenario: &Scenario,
    primary: &mut Value,
    events: &mut Value,
    message: &str,
    now_ms: u64,
) -> Result<(), ShapeError> {
    let account = primary
        .as_object_mut()
        .ok_or_else(|| ShapeError::NotAnObject {
            key: scenario.primary_key.to_string(),
        })?;
    let followups = match account.get("followups") {
        None | Some(Value::Null) => 1,
        Some(value) => {
            value.as_u64().ok_or_else(|| ShapeError::WrongType {
                key: scenario.primary_key.to_string(),
                field: "followups",
                expected: "a non-negative integer",
            })? + 1
        }
    };
    account.insert("followups".to_string(), json!(followups));
    account.insert("lastInteraction".to_string(), json!(now_ms));

    let events_doc = events
        .as_object_mut()
        .ok_or_else(|| ShapeError::NotAnObject {
            key: scenario.events_key.to_string(),
        })?;
    let list = events_doc
        .entry("events")
        .or_insert_with(|| Value::Array(Vec::new()));
    if list.is_null() {
        *list = Value::Array(Vec::new());
    }
    let list = list.as_array_mut().ok_or_else(|| ShapeError::WrongType {
        key: scenario.events_key.to_string(),
        field: "events",
        expected: "an array",
    })?;
    list.push(json!({
        "type": "EMAIL",
        "evtDate": now_ms,
        "message": message,
    }));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::scenario::ScenarioKind;
    use crate::commands::test_support;
    use doctx_core::FailureKind;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl Notifier for RecordingNotifier {
        fn send_email(
            &self,
            recipient: &str,
            message: &str,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.sent
                .lock()
                .unwrap()
                .push((recipient.to_string(), message.to_string()));
            Ok(())
        }
    }

    struct FailingNotifier;

    impl Notifier for FailingNotifier {
        fn send_email(
            &self,
            _recipient: &str,
            _message: &str,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Err("mail server down".into())
        }
    }

    fn options(kind: ScenarioKind) -> NotifyOptions {
        NotifyOptions {
            scenario: kind.scenario(),
            message: "Hey! What's up?".to_string(),
            durability: DurabilityLevel::None,
            timeout: Duration::from_secs(15),
            force_rollback: false,
        }
    }

    fn setup() -> (Cluster, Collection) {
        let cluster = Cluster::open_in_memory().unwrap();
        let collection = cluster.bucket("test").unwrap().default_collection();
        (cluster, collection)
    }

    #[test]
    fn each_run_records_one_email() {
        let (cluster, collection) = setup();
        let notifier = RecordingNotifier::default();
        let options = options(ScenarioKind::Account);

        notify(&cluster, &collection, &options, &notifier).unwrap();
        notify(&cluster, &collection, &options, &notifier).unwrap();

        let account = collection.get("acc1").unwrap().into_content();
        assert_eq!(account["followups"], 2);
        assert!(account["lastInteraction"].as_u64().unwrap() > 0);

        let events = collection.get("acc1evt").unwrap().into_content();
        let list = events["events"].as_array().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0]["type"], "EMAIL");
        assert_eq!(list[1]["message"], "Hey! What's up?");

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, "contact@acme.example");
    }

    #[test]
    fn interaction_time_comes_from_the_store_clock() {
        let (cluster, collection) = setup();
        let before = now_millis();
        notify(
            &cluster,
            &collection,
            &options(ScenarioKind::Customer),
            &RecordingNotifier::default(),
        )
        .unwrap();
        let after = now_millis();

        let stamp = collection.get("cust1").unwrap().content()["lastInteraction"]
            .as_u64()
            .unwrap();
        assert!((before..=after).contains(&stamp));
        let events = collection.get("cust1evt").unwrap().into_content();
        assert_eq!(events["events"][0]["evtDate"], stamp);
    }

    #[test]
    fn forced_rollback_changes_nothing() {
        let (cluster, collection) = setup();
        let notifier = RecordingNotifier::default();
        let mut options = options(ScenarioKind::Customer);
        notify(&cluster, &collection, &options, &notifier).unwrap();
        let before = (
            collection.get("cust1").unwrap().into_content(),
            collection.get("cust1evt").unwrap().into_content(),
        );

        options.force_rollback = true;
        let err = notify(&cluster, &collection, &options, &notifier).unwrap_err();
        match err {
            NotifyError::Transaction(failed) => {
                assert_eq!(failed.kind, FailureKind::Failed);
                assert_eq!(failed.result.attempts.len(), 1);
                assert!(!failed.result.log.is_empty());
                assert!(failed.to_string().contains("Emulating a rollback"));
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(collection.get("cust1").unwrap().into_content(), before.0);
        assert_eq!(collection.get("cust1evt").unwrap().into_content(), before.1);
        // the documents are not left locked
        collection.upsert("cust1", &before.0).unwrap();
    }

    #[test]
    fn notifier_failure_aborts_without_retry() {
        let (cluster, collection) = setup();
        let err = notify(
            &cluster,
            &collection,
            &options(ScenarioKind::Account),
            &FailingNotifier,
        )
        .unwrap_err();
        assert!(err.to_string().contains("mail server down"));
        assert!(collection.get("acc1").unwrap().content().get("followups").is_none());
    }

    #[test]
    fn run_persists_across_invocations() {
        let dir = tempdir().unwrap();
        let args = test_support::args(dir.path());
        run(&args, &options(ScenarioKind::Account)).unwrap();
        run(&args, &options(ScenarioKind::Account)).unwrap();

        let cluster = args.connect().unwrap();
        let collection = cluster.bucket("test").unwrap().default_collection();
        assert_eq!(collection.get("acc1").unwrap().content()["followups"], 2);
    }

    #[test]
    fn record_email_counts_from_missing() {
        let scenario = ScenarioKind::Account.scenario();
        let mut primary = json!({"name": "Acme"});
        let mut events = json!({"type": "accountEvents"});
        record_email(&scenario, &mut primary, &mut events, "hi", 42).unwrap();
        assert_eq!(primary["followups"], 1);
        assert_eq!(primary["lastInteraction"], 42);
        assert_eq!(
            events["events"],
            json!([{"type": "EMAIL", "evtDate": 42, "message": "hi"}])
        );

        record_email(&scenario, &mut primary, &mut events, "again", 43).unwrap();
        assert_eq!(primary["followups"], 2);
    }

    #[test]
    fn record_email_rejects_bad_shapes() {
        let scenario = ScenarioKind::Account.scenario();
        let mut events = json!({"events": []});
        assert!(matches!(
            record_email(&scenario, &mut json!([1]), &mut events, "m", 1),
            Err(ShapeError::NotAnObject { .. })
        ));
        assert!(matches!(
            record_email(&scenario, &mut json!({"followups": "x"}), &mut events, "m", 1),
            Err(ShapeError::WrongType { field: "followups", .. })
        ));
        assert!(matches!(
            record_email(&scenario, &mut json!({}), &mut json!({"events": 5}), "m", 1),
            Err(ShapeError::WrongType { field: "events", .. })
        ));
    }
}
