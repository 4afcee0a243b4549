use std::{cmp::Ordering, collections::HashMap, sync::RwLock};

use serde_json::Value as JsonValue;
use tracing::trace;

use crate::{
    FlowError, Result,
    store::{DbCollection, PageData, query::*},
};

use super::DbDocument;

/// A single in-memory table keyed by record id.
#[derive(Debug)]
pub struct Collect<T> {
    name: String,
    items: RwLock<HashMap<String, T>>,
}

impl<T> Collect<T> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            items: RwLock::new(HashMap::new()),
        }
    }

    fn poisoned(&self) -> FlowError {
        FlowError::Store(format!("collection {} lock poisoned", self.name))
    }
}

fn cmp_json(
    a: Option<&JsonValue>,
    b: Option<&JsonValue>,
) -> Ordering {
    match (a, b) {
        (Some(JsonValue::Number(a)), Some(JsonValue::Number(b))) => a.as_f64().partial_cmp(&b.as_f64()).unwrap_or(Ordering::Equal),
        (Some(JsonValue::String(a)), Some(JsonValue::String(b))) => a.cmp(b),
        (Some(JsonValue::Bool(a)), Some(JsonValue::Bool(b))) => a.cmp(b),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn is_match(
    doc: &HashMap<String, JsonValue>,
    q: &Query,
) -> bool {
    q.filters().iter().all(|(key, cond)| cond.matches(doc.get(key)))
}

impl<T> DbCollection for Collect<T>
where
    T: DbDocument + Clone + Send + Sync,
{
    type Item = T;

    fn exists(
        &self,
        id: &str,
    ) -> Result<bool> {
        let items = self.items.read().map_err(|_| self.poisoned())?;
        Ok(items.contains_key(id))
    }

    fn find(
        &self,
        id: &str,
    ) -> Result<Self::Item> {
        let items = self.items.read().map_err(|_| self.poisoned())?;
        items.get(id).cloned().ok_or_else(|| FlowError::NotFound(format!("{} {}", self.name, id)))
    }

    fn query(
        &self,
        q: &Query,
    ) -> Result<PageData<Self::Item>> {
        trace!("collect::query({})", self.name);
        let items = self.items.read().map_err(|_| self.poisoned())?;
        let mut rows = Vec::new();
        for item in items.values() {
            let doc = item.doc()?;
            if is_match(&doc, q) {
                rows.push((doc, item.clone()));
            }
        }
        drop(items);

        rows.sort_by(|(a, _), (b, _)| {
            for (key, rev) in q.order_by() {
                let ord = cmp_json(a.get(key), b.get(key));
                let ord = if *rev {
                    ord.reverse()
                } else {
                    ord
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            cmp_json(a.get("id"), b.get("id"))
        });

        let count = rows.len();
        let rows = rows.into_iter().skip(q.offset()).take(q.limit()).map(|(_, item)| item).collect::<Vec<_>>();
        Ok(PageData {
            count,
            page_num: q.offset() / q.limit() + 1,
            page_count: count.div_ceil(q.limit()),
            page_size: q.limit(),
            rows,
        })
    }

    fn create(
        &self,
        data: &Self::Item,
    ) -> Result<bool> {
        let mut items = self.items.write().map_err(|_| self.poisoned())?;
        if items.contains_key(data.id()) {
            return Ok(false);
        }
        items.insert(data.id().to_string(), data.clone());
        Ok(true)
    }

    fn update(
        &self,
        data: &Self::Item,
    ) -> Result<bool> {
        let mut items = self.items.write().map_err(|_| self.poisoned())?;
        match items.get_mut(data.id()) {
            Some(item) => {
                *item = data.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn update_if(
        &self,
        data: &Self::Item,
        field: &str,
        cond: &Cond,
    ) -> Result<bool> {
        let mut items = self.items.write().map_err(|_| self.poisoned())?;
        let Some(item) = items.get_mut(data.id()) else {
            return Ok(false);
        };
        if !cond.matches(item.doc()?.get(field)) {
            return Ok(false);
        }
        *item = data.clone();
        Ok(true)
    }

    fn delete(
        &self,
        id: &str,
    ) -> Result<bool> {
        let mut items = self.items.write().map_err(|_| self.poisoned())?;
        Ok(items.remove(id).is_some())
    }
}
