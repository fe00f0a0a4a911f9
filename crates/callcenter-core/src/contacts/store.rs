use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::error::{CallCenterError, Result};
use crate::ids::{AgentId, CampaignId, ContactId};

use super::types::{normalize_phone, AttemptOutcome, AttemptRecord, Contact, ContactLock, RetryPolicy};

/// Contact database as the dialer and inbound router use it
///
/// `try_lock` must be an atomic compare-and-set: of any number of concurrent callers
/// for the same unlocked contact exactly one gets `true`.
#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Unlocked contacts eligible for another attempt, fewest attempts first, then oldest
    async fn find_dialable(&self, campaign: &CampaignId, limit: usize) -> Result<Vec<Contact>>;

    /// Take the dialing lock; `false` when another owner holds it
    async fn try_lock(&self, contact: &ContactId, owner: &str) -> Result<bool>;

    /// Release a lock held by `owner`; no-op when someone else holds it
    async fn unlock(&self, contact: &ContactId, owner: &str) -> Result<()>;

    /// Release a lock regardless of owner (stale-lock recovery)
    async fn force_unlock(&self, contact: &ContactId) -> Result<()>;

    /// Count a dial attempt. Called once per placed dial.
    async fn record_attempt(&self, contact: &ContactId, attempt: AttemptRecord) -> Result<Contact>;

    /// Record how the last attempt ended without counting another attempt
    async fn record_outcome(
        &self,
        contact: &ContactId,
        outcome: AttemptOutcome,
        agent: Option<&AgentId>,
    ) -> Result<Contact>;

    async fn get(&self, contact: &ContactId) -> Result<Option<Contact>>;

    /// Contact for a caller's number; the most recently attempted one when the number
    /// appears in several campaigns
    async fn find_by_phone(&self, phone: &str) -> Result<Option<Contact>>;

    /// Locked contacts in `campaign` whose lock is older than `older_than`
    async fn stale_locks(&self, campaign: &CampaignId, older_than: Duration) -> Result<Vec<Contact>>;

    /// Still dialable and under its attempt ceiling; the cooldown is not considered
    async fn is_retry_eligible(&self, contact: &ContactId) -> Result<bool>;
}

/// Contact store in process memory
///
/// # Examples
///
/// ```
/// use callcenter_core::contacts::{Contact, ContactStore, InMemoryContactStore};
///
/// # async fn example() -> callcenter_core::Result<()> {
/// let store = InMemoryContactStore::new();
/// store.insert(Contact::new("c-1", "renewals", "+15550001111"));
///
/// assert!(store.try_lock(&"c-1".into(), "worker-a").await?);
/// assert!(!store.try_lock(&"c-1".into(), "worker-b").await?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryContactStore {
    contacts: Arc<DashMap<ContactId, Contact>>,
    policies: Arc<DashMap<CampaignId, RetryPolicy>>,
    default_policy: RetryPolicy,
}

impl InMemoryContactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self {
            default_policy: policy,
            ..Self::default()
        }
    }

    /// Override the retry policy for one campaign
    pub fn set_campaign_policy(&self, campaign: CampaignId, policy: RetryPolicy) {
        self.policies.insert(campaign, policy);
    }

    fn policy_for(&self, campaign: &CampaignId) -> RetryPolicy {
        self.policies
            .get(campaign)
            .map(|p| *p)
            .unwrap_or(self.default_policy)
    }

    pub fn insert(&self, contact: Contact) {
        self.contacts.insert(contact.id.clone(), contact);
    }

    pub fn insert_many(&self, contacts: impl IntoIterator<Item = Contact>) -> usize {
        let mut count = 0;
        for contact in contacts {
            self.insert(contact);
            count += 1;
        }
        info!("📇 Loaded {} contacts", count);
        count
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    fn update<F>(&self, contact: &ContactId, f: F) -> Result<Contact>
    where
        F: FnOnce(&mut Contact, &RetryPolicy),
    {
        let mut entry = self
            .contacts
            .get_mut(contact)
            .ok_or_else(|| CallCenterError::not_found(format!("contact {}", contact)))?;
        let policy = self.policy_for(&entry.campaign_id);
        f(entry.value_mut(), &policy);
        Ok(entry.clone())
    }
}

#[async_trait]
impl ContactStore for InMemoryContactStore {
    async fn find_dialable(&self, campaign: &CampaignId, limit: usize) -> Result<Vec<Contact>> {
        let now = Utc::now();
        let policy = self.policy_for(campaign);
        let mut eligible: Vec<Contact> = self
            .contacts
            .iter()
            .filter(|c| &c.campaign_id == campaign && policy.is_eligible(c.value(), now))
            .map(|c| c.value().clone())
            .collect();
        eligible.sort_by(|a, b| {
            a.attempts
                .cmp(&b.attempts)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        eligible.truncate(limit);
        Ok(eligible)
    }

    async fn try_lock(&self, contact: &ContactId, owner: &str) -> Result<bool> {
        let mut entry = self
            .contacts
            .get_mut(contact)
            .ok_or_else(|| CallCenterError::not_found(format!("contact {}", contact)))?;
        if entry.lock.is_some() {
            return Ok(false);
        }
        entry.lock = Some(ContactLock {
            owner: owner.to_string(),
            acquired_at: Utc::now(),
        });
        Ok(true)
    }

    async fn unlock(&self, contact: &ContactId, owner: &str) -> Result<()> {
        self.update(contact, |c, _| {
            if c.lock.as_ref().map(|l| l.owner == owner).unwrap_or(false) {
                c.lock = None;
            }
        })?;
        Ok(())
    }

    async fn force_unlock(&self, contact: &ContactId) -> Result<()> {
        self.update(contact, |c, _| {
            if let Some(lock) = c.lock.take() {
                debug!("🔓 Force-released lock on {} held by {}", c.id, lock.owner);
            }
        })?;
        Ok(())
    }

    async fn record_attempt(&self, contact: &ContactId, attempt: AttemptRecord) -> Result<Contact> {
        self.update(contact, |c, _| {
            c.attempts += 1;
            c.last_attempt_at = Some(attempt.at);
            c.last_call_id = Some(attempt.call_id);
        })
    }

    async fn record_outcome(
        &self,
        contact: &ContactId,
        outcome: AttemptOutcome,
        agent: Option<&AgentId>,
    ) -> Result<Contact> {
        self.update(contact, |c, policy| {
            c.last_outcome = Some(outcome);
            if let Some(agent) = agent {
                c.last_agent_id = Some(agent.clone());
            }
            if outcome.reached()
                || outcome == AttemptOutcome::ProviderRejected
                || c.attempts >= policy.max_attempts_for(c)
            {
                c.dialable = false;
            }
        })
    }

    async fn get(&self, contact: &ContactId) -> Result<Option<Contact>> {
        Ok(self.contacts.get(contact).map(|c| c.clone()))
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<Contact>> {
        let wanted = normalize_phone(phone);
        if wanted.is_empty() {
            return Ok(None);
        }
        Ok(self
            .contacts
            .iter()
            .filter(|c| normalize_phone(&c.phone_number) == wanted)
            .max_by_key(|c| c.last_attempt_at)
            .map(|c| c.value().clone()))
    }

    async fn stale_locks(&self, campaign: &CampaignId, older_than: Duration) -> Result<Vec<Contact>> {
        let now = Utc::now();
        Ok(self
            .contacts
            .iter()
            .filter(|c| &c.campaign_id == campaign)
            .filter(|c| {
                c.lock
                    .as_ref()
                    .and_then(|l| (now - l.acquired_at).to_std().ok())
                    .map(|age| age > older_than)
                    .unwrap_or(false)
            })
            .map(|c| c.value().clone())
            .collect())
    }

    async fn is_retry_eligible(&self, contact: &ContactId) -> Result<bool> {
        let entry = self
            .contacts
            .get(contact)
            .ok_or_else(|| CallCenterError::not_found(format!("contact {}", contact)))?;
        let policy = self.policy_for(&entry.campaign_id);
        Ok(entry.dialable && entry.attempts < policy.max_attempts_for(&entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::CallId;

    fn store() -> InMemoryContactStore {
        InMemoryContactStore::with_policy(RetryPolicy {
            max_attempts: 2,
            cooldown: Duration::from_secs(0),
        })
    }

    #[tokio::test]
    async fn test_concurrent_lock_has_one_winner() {
        let store = store();
        store.insert(Contact::new("c1", "camp", "+15550001111"));

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.try_lock(&"c1".into(), &format!("w{}", i)).await.unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_unlock_checks_owner() {
        let store = store();
        store.insert(Contact::new("c1", "camp", "+15550001111"));
        assert!(store.try_lock(&"c1".into(), "a").await.unwrap());

        store.unlock(&"c1".into(), "b").await.unwrap();
        assert!(store.get(&"c1".into()).await.unwrap().unwrap().is_locked());

        store.unlock(&"c1".into(), "a").await.unwrap();
        assert!(!store.get(&"c1".into()).await.unwrap().unwrap().is_locked());
    }

    #[tokio::test]
    async fn test_find_dialable_ordering_and_exclusions() {
        let store = store();
        let mut old = Contact::new("old", "camp", "+1");
        old.created_at = Utc::now() - chrono::Duration::hours(1);
        let mut tried = Contact::new("tried", "camp", "+2");
        tried.attempts = 1;
        tried.created_at = Utc::now() - chrono::Duration::hours(2);
        let new = Contact::new("new", "camp", "+3");
        let other = Contact::new("other", "elsewhere", "+4");
        store.insert_many([old, tried, new, other]);

        store.try_lock(&"new".into(), "w").await.unwrap();

        let ids: Vec<_> = store
            .find_dialable(&"camp".into(), 10)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![ContactId::from("old"), ContactId::from("tried")]);
    }

    #[tokio::test]
    async fn test_attempt_ceiling_marks_non_dialable() {
        let store = store();
        store.insert(Contact::new("c1", "camp", "+15550001111"));
        let id = ContactId::from("c1");

        for _ in 0..2 {
            store
                .record_attempt(&id, AttemptRecord { call_id: CallId::new(), at: Utc::now() })
                .await
                .unwrap();
        }
        let contact = store.record_outcome(&id, AttemptOutcome::NoAnswer, None).await.unwrap();
        assert_eq!(contact.attempts, 2);
        assert!(!contact.dialable);
        assert!(!store.is_retry_eligible(&id).await.unwrap());
        assert!(store.find_dialable(&"camp".into(), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_by_phone_prefers_latest_attempt() {
        let store = store();
        let mut a = Contact::new("a", "spring", "+1 555 000 1111");
        a.last_attempt_at = Some(Utc::now() - chrono::Duration::days(3));
        let mut b = Contact::new("b", "autumn", "+15550001111");
        b.last_attempt_at = Some(Utc::now() - chrono::Duration::minutes(5));
        store.insert_many([a, b]);

        let found = store.find_by_phone("+1 (555) 000-1111").await.unwrap().unwrap();
        assert_eq!(found.id, ContactId::from("b"));
        assert!(store.find_by_phone("+19999999999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_locks() {
        let store = store();
        store.insert(Contact::new("c1", "camp", "+1"));
        store.insert(Contact::new("c2", "camp", "+2"));
        store.try_lock(&"c1".into(), "crashed").await.unwrap();
        store.try_lock(&"c2".into(), "alive").await.unwrap();
        store.contacts.get_mut(&ContactId::from("c1")).unwrap().lock.as_mut().unwrap().acquired_at =
            Utc::now() - chrono::Duration::minutes(10);

        let stale = store.stale_locks(&"camp".into(), Duration::from_secs(300)).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, ContactId::from("c1"));

        store.force_unlock(&"c1".into()).await.unwrap();
        assert!(!store.get(&"c1".into()).await.unwrap().unwrap().is_locked());
    }
}
