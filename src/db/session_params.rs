use crate::FirestoreConsistencySelector;
use rsb_derive::*;

#[derive(Clone, Builder)]
pub struct FirestoreDbSessionParams {
    pub consistency_selector: Option<FirestoreConsistencySelector>,
}
