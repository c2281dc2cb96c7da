// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! The single authorization hook the core consumes (`spec.md` §1/§7):
//! authentication protocols themselves, and user/ACL management, are out
//! of scope. The core only acts on a yes/no [`Decision`] for a given
//! publish or subscribe attempt.

use async_trait::async_trait;

use crate::topic::{Topic, TopicFilter};
use crate::types::ClientId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Called before a PUBLISH reaches the Session Handler. A `Deny`
    /// fails the single frame with `ErrorKind::NotAuthorized` and does
    /// not disconnect the client (`spec.md` §7).
    async fn authorize_publish(&self, client_id: &ClientId, topic: &Topic) -> Decision;

    /// Called before a SUBSCRIBE filter is added to the index.
    async fn authorize_subscribe(&self, client_id: &ClientId, filter: &TopicFilter) -> Decision;
}

/// Allows every publish and subscribe. Used when no external authorizer
/// is wired in, and by every test in this repo.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize_publish(&self, _client_id: &ClientId, _topic: &Topic) -> Decision {
        Decision::Allow
    }

    async fn authorize_subscribe(&self, _client_id: &ClientId, _filter: &TopicFilter) -> Decision {
        Decision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allow_all_allows_everything() {
        let authorizer = AllowAll;
        let topic = Topic::parse("a/b").unwrap();
        let filter = TopicFilter::parse("a/+").unwrap();
        assert!(authorizer.authorize_publish(&"c1".to_string(), &topic).await.is_allowed());
        assert!(authorizer.authorize_subscribe(&"c1".to_string(), &filter).await.is_allowed());
    }
}
