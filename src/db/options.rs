use gcloud_sdk::GoogleEnvironment;
use rsb_derive::Builder;
use std::collections::HashMap;

#[derive(Debug, Eq, PartialEq, Clone, Builder)]
pub struct FirestoreDbOptions {
    pub google_project_id: String,

    #[default = "FIREBASE_DEFAULT_DATABASE_ID.to_string()"]
    pub database_id: String,

    #[default = "3"]
    pub max_retries: usize,

    /// Default attempt budget for `run_transaction`.
    #[default = "5"]
    pub max_transaction_attempts: usize,

    pub firebase_api_url: Option<String>,

    /// When present, environment lookups (emulator host detection) consult
    /// this map instead of the process environment. Used for test isolation.
    pub environment_override: Option<HashMap<String, String>>,
}

impl FirestoreDbOptions {
    pub async fn for_default_project_id() -> Option<FirestoreDbOptions> {
        let google_project_id = GoogleEnvironment::detect_google_project_id().await;

        google_project_id.map(FirestoreDbOptions::new)
    }

    pub(crate) fn lookup_env(&self, name: &str) -> Option<String> {
        match self.environment_override {
            Some(ref environment) => environment.get(name).cloned(),
            None => std::env::var(name).ok(),
        }
    }
}

pub const FIREBASE_DEFAULT_DATABASE_ID: &str = "(default)";
