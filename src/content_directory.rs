//! ContentDirectory Browse client: issues the Browse SOAP action, paginates
//! over short reads, and caches the resulting [`Children`] behind a
//! fixed-size hash-indexed table.
//!
//! Grounded in `content_dir.c`'s `BrowseAction`/`BrowseAll`/`ContentDir_BrowseChildren`
//! family. Unlike that source, the cache mutex here is never held across the
//! network call: a lookup takes the mutex, releases it, does the (possibly
//! paginated) Browse unlocked, then re-takes the mutex only to store the
//! result and update the counters.

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use anyhow::Context;

use crate::{
    config::Config,
    didl::{parse_didl_document, Children, DIDLObject},
    service::ServiceCore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BrowseFlag {
    BrowseDirectChildren,
    BrowseMetadata,
}

impl BrowseFlag {
    fn as_str(self) -> &'static str {
        match self {
            BrowseFlag::BrowseDirectChildren => "BrowseDirectChildren",
            BrowseFlag::BrowseMetadata => "BrowseMetadata",
        }
    }
}

struct BrowseActionResult {
    objects: Vec<DIDLObject>,
    total_matches: usize,
}

struct CacheSlot {
    id: String,
    hash: u64,
    children: Arc<Children>,
    limit: Instant,
}

fn hash_id(id: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    hasher.finish()
}

struct Cache {
    slots: Mutex<Vec<Option<CacheSlot>>>,
    timeout: Duration,
    access: AtomicU64,
    hit: AtomicU64,
    collide: AtomicU64,
    expired: AtomicU64,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("size", &self.slots.lock().unwrap().len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// A handed-off reference to one cached Browse result. Plain `Arc` clone
/// semantics already give pointer stability across cache eviction: a reader's
/// clone keeps the `Children` alive even after the cache slot is overwritten,
/// so no extra destructor hook is needed to "re-take the cache mutex on drop"
/// the way the talloc-refcounted original does.
#[derive(Debug, Clone)]
pub struct BrowseResult(Arc<Children>);

impl std::ops::Deref for BrowseResult {
    type Target = Children;

    fn deref(&self) -> &Children {
        &self.0
    }
}

impl BrowseResult {
    pub fn ptr_eq(a: &BrowseResult, b: &BrowseResult) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

/// The ContentDirectory-specific service variant: a plain [`ServiceCore`]
/// plus the Browse cache.
#[derive(Debug, Clone)]
pub struct ContentDirectoryClient {
    pub core: ServiceCore,
    cache: Arc<Cache>,
    max_browse_retries: u8,
    max_content_length: usize,
}

impl ContentDirectoryClient {
    pub fn new(core: ServiceCore, config: &Config) -> Self {
        let mut slots = Vec::with_capacity(config.cache_size);
        slots.resize_with(config.cache_size, || None);
        Self {
            core,
            cache: Arc::new(Cache {
                slots: Mutex::new(slots),
                timeout: config.cache_timeout,
                access: AtomicU64::new(0),
                hit: AtomicU64::new(0),
                collide: AtomicU64::new(0),
                expired: AtomicU64::new(0),
            }),
            max_browse_retries: config.max_browse_retries,
            max_content_length: config.max_content_length,
        }
    }

    /// Returns every direct child of `object_id`, serving from cache when a
    /// fresh entry exists. `None` on any transport, SOAP, or parse failure
    /// (already logged); nothing is cached on failure.
    pub async fn browse_children(&self, object_id: &str) -> Option<BrowseResult> {
        match self.cached_browse_all(object_id).await {
            Ok(children) => Some(BrowseResult(children)),
            Err(err) => {
                tracing::warn!(object_id, error = %err, "browse_children failed");
                None
            }
        }
    }

    /// Returns `object_id`'s own metadata via `BrowseMetadata`. Never cached:
    /// metadata requests are one-shot and the cache only holds children lists.
    pub async fn browse_metadata(&self, object_id: &str) -> Option<DIDLObject> {
        match self
            .browse_action(object_id, BrowseFlag::BrowseMetadata, 0, 1)
            .await
        {
            Ok(result) => {
                if result.objects.len() != 1 {
                    tracing::warn!(
                        object_id,
                        got = result.objects.len(),
                        "BrowseMetadata did not return exactly one object"
                    );
                }
                result.objects.into_iter().next()
            }
            Err(err) => {
                tracing::warn!(object_id, error = %err, "browse_metadata failed");
                None
            }
        }
    }

    async fn cached_browse_all(&self, object_id: &str) -> anyhow::Result<Arc<Children>> {
        self.cache.access.fetch_add(1, Ordering::Relaxed);
        let hash = hash_id(object_id);
        let slot_count = self.cache.slots.lock().unwrap().len();
        anyhow::ensure!(slot_count > 0, "cache has zero capacity");
        let index = (hash as usize) % slot_count;

        {
            let slots = self.cache.slots.lock().unwrap();
            if let Some(slot) = &slots[index] {
                let same_id = slot.hash == hash && slot.id == object_id;
                if same_id && Instant::now() <= slot.limit {
                    self.cache.hit.fetch_add(1, Ordering::Relaxed);
                    return Ok(slot.children.clone());
                }
            }
        }

        let objects = self.browse_all(object_id).await?;
        let children = Arc::new(Children::new(objects));

        {
            let mut slots = self.cache.slots.lock().unwrap();
            match &slots[index] {
                None => {}
                Some(slot) if slot.id == object_id => {
                    self.cache.expired.fetch_add(1, Ordering::Relaxed);
                }
                Some(_) => {
                    self.cache.collide.fetch_add(1, Ordering::Relaxed);
                }
            }
            slots[index] = Some(CacheSlot {
                id: object_id.to_owned(),
                hash,
                children: children.clone(),
                limit: Instant::now() + self.cache.timeout,
            });
        }

        Ok(children)
    }

    /// Fetches every child of `object_id`, issuing up to
    /// `max_browse_retries` follow-up pages if the first response came back
    /// short.
    async fn browse_all(&self, object_id: &str) -> anyhow::Result<Vec<DIDLObject>> {
        anyhow::ensure!(!object_id.is_empty(), "empty object id");
        let first = self
            .browse_action(object_id, BrowseFlag::BrowseDirectChildren, 0, 0)
            .await?;
        let total = first.total_matches;
        let mut objects = first.objects;

        let mut retries = 0;
        while objects.len() < total && retries < self.max_browse_retries {
            retries += 1;
            let starting_index = objects.len() as u32;
            let requested_count = (total - objects.len()) as u32;
            let page = self
                .browse_action(
                    object_id,
                    BrowseFlag::BrowseDirectChildren,
                    starting_index,
                    requested_count,
                )
                .await;
            match page {
                Ok(page) if !page.objects.is_empty() => objects.extend(page.objects),
                Ok(_) => {
                    tracing::warn!(object_id, "Browse follow-up returned no new objects, stopping");
                    break;
                }
                Err(err) => {
                    tracing::warn!(object_id, error = %err, "Browse follow-up failed, stopping");
                    break;
                }
            }
        }

        if objects.len() < total {
            tracing::warn!(
                object_id,
                got = objects.len(),
                total,
                "short Browse result after retries"
            );
        }

        Ok(objects)
    }

    async fn browse_action(
        &self,
        object_id: &str,
        flag: BrowseFlag,
        starting_index: u32,
        requested_count: u32,
    ) -> anyhow::Result<BrowseActionResult> {
        anyhow::ensure!(!object_id.is_empty(), "empty object id");
        let starting_index = starting_index.to_string();
        let requested_count = requested_count.to_string();
        let args = [
            ("ObjectID", object_id),
            ("BrowseFlag", flag.as_str()),
            ("Filter", "*"),
            ("StartingIndex", starting_index.as_str()),
            ("RequestedCount", requested_count.as_str()),
            ("SortCriteria", ""),
        ];

        let response = self
            .core
            .send_action("Browse", &args, self.max_content_length)
            .await?
            .map_err(|fault| anyhow::anyhow!("Browse faulted: {fault}"))?;

        let result_xml = response.get("Result").context("missing Result argument")?;
        let number_returned: usize = response
            .get("NumberReturned")
            .context("missing NumberReturned argument")?
            .parse()
            .context("NumberReturned is not an integer")?;
        let total_matches: usize = response
            .get("TotalMatches")
            .context("missing TotalMatches argument")?
            .parse()
            .context("TotalMatches is not an integer")?;

        let objects = parse_didl_document(result_xml)?;
        if objects.len() != number_returned {
            tracing::error!(
                object_id,
                parsed = objects.len(),
                advertised = number_returned,
                "NumberReturned does not match parsed DIDL object count, trusting parsed count"
            );
        }

        Ok(BrowseActionResult {
            objects,
            total_matches,
        })
    }

    /// Renders this service's status block, including the cache counters.
    pub fn status_string(&self, indent: &str) -> String {
        let mut s = self.core.status_for_tree(indent, "ContentDirectory");
        let access = self.cache.access.load(Ordering::Relaxed);
        let hit = self.cache.hit.load(Ordering::Relaxed);
        let collide = self.cache.collide.load(Ordering::Relaxed);
        let expired = self.cache.expired.load(Ordering::Relaxed);
        s.push_str(&format!(
            "{indent}  cache: size={size} timeout={timeout}s access={access} hit={hit} collide={collide} expired={expired}\n",
            size = self.cache.slots.lock().unwrap().len(),
            timeout = self.cache.timeout.as_secs(),
        ));
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_core() -> ServiceCore {
        ServiceCore {
            service_id: "urn:upnp-org:serviceId:ContentDirectory".to_owned(),
            service_type: crate::urn::URN::content_directory(),
            control_url: "http://example.invalid/ctl/cds".to_owned(),
            event_url: "http://example.invalid/evt/cds".to_owned(),
            client: reqwest::Client::new(),
        }
    }

    #[test]
    fn cache_classifies_new_hit_and_collide() {
        let cds = ContentDirectoryClient::new(test_core(), &Config {
            cache_size: 1,
            ..Config::default()
        });

        let children_a = Arc::new(Children::new(vec![]));
        {
            let mut slots = cds.cache.slots.lock().unwrap();
            slots[0] = Some(CacheSlot {
                id: "A".to_owned(),
                hash: hash_id("A"),
                children: children_a.clone(),
                limit: Instant::now() + Duration::from_secs(60),
            });
        }
        cds.cache.access.fetch_add(1, Ordering::Relaxed);
        {
            let slots = cds.cache.slots.lock().unwrap();
            let slot = slots[0].as_ref().unwrap();
            assert_eq!(slot.id, "A");
            assert!(Instant::now() <= slot.limit);
        }

        // A different id hashing into the same (single) slot evicts "A" and
        // should be classified as a collision, not a fresh miss.
        {
            let mut slots = cds.cache.slots.lock().unwrap();
            match &slots[0] {
                Some(slot) if slot.id == "B" => unreachable!(),
                Some(_) => cds.cache.collide.fetch_add(1, Ordering::Relaxed),
                None => {}
            }
            slots[0] = Some(CacheSlot {
                id: "B".to_owned(),
                hash: hash_id("B"),
                children: Arc::new(Children::new(vec![])),
                limit: Instant::now() + Duration::from_secs(60),
            });
        }
        assert_eq!(cds.cache.collide.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn browse_result_survives_cache_eviction() {
        let children = Arc::new(Children::new(vec![]));
        let handed_out = BrowseResult(children.clone());
        drop(children);
        assert_eq!(handed_out.len(), 0);
    }
}
