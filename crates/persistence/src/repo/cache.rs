//! Bounded read cache.
//!
//! Maps `(kind, id)` to the latest resource. Consulted only by `read`;
//! never by search or history. Invalidated on update and delete.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use uuid::Uuid;

use atrium_fhir::Resource;

type CacheKey = (String, Uuid);

struct Inner {
    map: HashMap<CacheKey, Resource>,
    order: VecDeque<CacheKey>,
}

/// LRU-bounded cache of latest resource versions.
pub struct ResourceCache {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl ResourceCache {
    /// Creates a cache bounded to `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity,
        }
    }

    /// Looks up a resource, refreshing its recency.
    pub fn get(&self, resource_type: &str, id: Uuid) -> Option<Resource> {
        let key = (resource_type.to_string(), id);
        let mut inner = self.inner.lock();
        let resource = inner.map.get(&key).cloned()?;
        if let Some(pos) = inner.order.iter().position(|k| *k == key) {
            inner.order.remove(pos);
            inner.order.push_back(key);
        }
        Some(resource)
    }

    /// Stores the latest version, evicting the least recently used entry
    /// when full.
    pub fn put(&self, resource_type: &str, id: Uuid, resource: Resource) {
        if self.capacity == 0 {
            return;
        }
        let key = (resource_type.to_string(), id);
        let mut inner = self.inner.lock();
        if inner.map.insert(key.clone(), resource).is_none() {
            inner.order.push_back(key);
        } else if let Some(pos) = inner.order.iter().position(|k| *k == key) {
            inner.order.remove(pos);
            inner.order.push_back(key);
        }
        while inner.map.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.map.remove(&evicted);
            } else {
                break;
            }
        }
    }

    /// Drops an entry after update or delete.
    pub fn invalidate(&self, resource_type: &str, id: Uuid) {
        let key = (resource_type.to_string(), id);
        let mut inner = self.inner.lock();
        if inner.map.remove(&key).is_some() {
            if let Some(pos) = inner.order.iter().position(|k| *k == key) {
                inner.order.remove(pos);
            }
        }
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patient(id: Uuid) -> Resource {
        Resource::from_value(json!({"resourceType": "Patient", "id": id.to_string()})).unwrap()
    }

    #[test]
    fn test_put_get_invalidate() {
        let cache = ResourceCache::new(4);
        let id = Uuid::new_v4();
        cache.put("Patient", id, patient(id));

        assert!(cache.get("Patient", id).is_some());
        assert!(cache.get("Observation", id).is_none());

        cache.invalidate("Patient", id);
        assert!(cache.get("Patient", id).is_none());
    }

    #[test]
    fn test_eviction_order() {
        let cache = ResourceCache::new(2);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        cache.put("Patient", a, patient(a));
        cache.put("Patient", b, patient(b));
        // Touch a so b becomes least recently used.
        cache.get("Patient", a);
        cache.put("Patient", c, patient(c));

        assert!(cache.get("Patient", a).is_some());
        assert!(cache.get("Patient", b).is_none());
        assert!(cache.get("Patient", c).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_zero_capacity_disables() {
        let cache = ResourceCache::new(0);
        let id = Uuid::new_v4();
        cache.put("Patient", id, patient(id));
        assert!(cache.is_empty());
    }
}
