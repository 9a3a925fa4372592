//! Identity management.

use std::collections::HashMap;

use serde::Serialize;
use warden_protocol::Identity;

use crate::client::Client;
use crate::envelope::decode_result;
use crate::error::ClientError;
use crate::requester::RequestOptions;

#[derive(Serialize)]
struct IdentitiesPayload<'a> {
    action: &'a str,
    identities: &'a HashMap<String, Option<Identity>>,
}

impl Client {
    /// The full name-to-identity map.
    pub async fn identities(&self) -> Result<HashMap<String, Identity>, ClientError> {
        let result = self
            .requester()
            .do_sync(RequestOptions::get("/v1/identities"))
            .await?;
        decode_result(result.as_deref(), "identities")
    }

    /// Add identities; fails if any named identity already exists.
    pub async fn add_identities(
        &self,
        identities: &HashMap<String, Identity>,
    ) -> Result<(), ClientError> {
        self.identities_action("add", &to_optional(identities)).await
    }

    /// Update identities; fails if any named identity does not exist.
    pub async fn update_identities(
        &self,
        identities: &HashMap<String, Identity>,
    ) -> Result<(), ClientError> {
        self.identities_action("update", &to_optional(identities))
            .await
    }

    /// Replace identities wholesale.  A `None` value deletes that name.
    pub async fn replace_identities(
        &self,
        identities: &HashMap<String, Option<Identity>>,
    ) -> Result<(), ClientError> {
        self.identities_action("replace", identities).await
    }

    /// Remove the named identities.
    pub async fn remove_identities(&self, names: &[String]) -> Result<(), ClientError> {
        let identities: HashMap<String, Option<Identity>> =
            names.iter().map(|n| (n.clone(), None)).collect();
        self.identities_action("remove", &identities).await
    }

    async fn identities_action(
        &self,
        action: &str,
        identities: &HashMap<String, Option<Identity>>,
    ) -> Result<(), ClientError> {
        let payload = IdentitiesPayload { action, identities };
        self.requester()
            .do_sync(RequestOptions::post_json("/v1/identities", &payload)?)
            .await?;
        Ok(())
    }
}

fn to_optional(identities: &HashMap<String, Identity>) -> HashMap<String, Option<Identity>> {
    identities
        .iter()
        .map(|(name, identity)| (name.clone(), Some(identity.clone())))
        .collect()
}
