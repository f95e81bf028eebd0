//! Sample data sets for the notification workflow.

use clap::ValueEnum;
use serde_json::{json, Value};

/// Selectable data set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScenarioKind {
    /// `acc1` and its events document `acc1evt`
    Account,
    /// `cust1` and its events document `cust1evt`
    Customer,
}

impl ScenarioKind {
    /// The data set.
    #[must_use]
    pub fn scenario(self) -> Scenario {
        match self {
            Self::Account => Scenario {
                primary_key: "acc1",
                events_key: "acc1evt",
                owner_field: "accountId",
                doc_type: "account",
                name: "Acme Inc.",
                email: "contact@acme.example",
            },
            Self::Customer => Scenario {
                primary_key: "cust1",
                events_key: "cust1evt",
                owner_field: "customerId",
                doc_type: "customer",
                name: "Jane Doe",
                email: "jane.doe@example.com",
            },
        }
    }
}

/// Keys and sample content of one data set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    /// Key of the account or customer document.
    pub primary_key: &'static str,
    /// Key of its events document.
    pub events_key: &'static str,
    /// Field of the events document naming its owner.
    pub owner_field: &'static str,
    /// `type` of the primary document.
    pub doc_type: &'static str,
    /// Sample name.
    pub name: &'static str,
    /// Sample email address.
    pub email: &'static str,
}

impl Scenario {
    /// Sample primary document.
    #[must_use]
    pub fn primary_seed(&self) -> Value {
        json!({
            "type": self.doc_type,
            "id": self.primary_key,
            "name": self.name,
            "email": self.email,
        })
    }

    /// Empty events document for the primary document.
    #[must_use]
    pub fn events_seed(&self) -> Value {
        let mut seed = json!({
            "type": format!("{}Events", self.doc_type),
            "events": [],
        });
        seed[self.owner_field] = Value::from(self.primary_key);
        seed
    }
}
