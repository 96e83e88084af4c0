use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
};

use tracing::trace;

use crate::{
    AutoflowError, Result, ShareLock,
    store::{DbCollection, PageData, query::Query},
};

use super::DbDocument;

/// One in-memory collection, keyed by document id in sorted order.
#[derive(Debug)]
pub struct Collect<T> {
    name: String,
    items: ShareLock<BTreeMap<String, T>>,
}

impl<T> Collect<T> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            items: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    fn poisoned(&self) -> AutoflowError {
        AutoflowError::Store(format!("collection '{}' lock poisoned", self.name))
    }
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
        items.get(id).cloned().ok_or_else(|| AutoflowError::Store(format!("{} '{}' not found", self.name, id)))
    }

    fn query(
        &self,
        query: &Query,
    ) -> Result<PageData<Self::Item>> {
        let items = self.items.read().map_err(|_| self.poisoned())?;
        let mut matched = Vec::new();
        for item in items.values() {
            let doc = item.doc()?;
            if query.filters.iter().all(|(field, value)| doc.get(field) == Some(value)) {
                matched.push(item.clone());
            }
        }

        let count = matched.len();
        let page_size = query.limit.min(count.max(1));
        let rows: Vec<T> = matched.into_iter().skip(query.offset).take(query.limit).collect();
        Ok(PageData {
            count,
            page_num: query.offset / page_size + 1,
            page_count: count.div_ceil(page_size),
            page_size,
            rows,
        })
    }

    fn create(
        &self,
        data: &Self::Item,
    ) -> Result<bool> {
        trace!("{}::create({})", self.name, data.id());
        let mut items = self.items.write().map_err(|_| self.poisoned())?;
        if items.contains_key(data.id()) {
            return Err(AutoflowError::Store(format!("{} '{}' already exists", self.name, data.id())));
        }
        items.insert(data.id().to_string(), data.clone());
        Ok(true)
    }

    fn update(
        &self,
        data: &Self::Item,
    ) -> Result<bool> {
        trace!("{}::update({})", self.name, data.id());
        let mut items = self.items.write().map_err(|_| self.poisoned())?;
        match items.get_mut(data.id()) {
            Some(item) => {
                *item = data.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(
        &self,
        id: &str,
    ) -> Result<bool> {
        trace!("{}::delete({})", self.name, id);
        let mut items = self.items.write().map_err(|_| self.poisoned())?;
        Ok(items.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{data::Trigger, query::q};

    fn trigger(
        id: &str,
        wid: &str,
    ) -> Trigger {
        Trigger {
            id: id.into(),
            wid: wid.into(),
            enabled: true,
            data: "{}".into(),
            update_time: 0,
        }
    }

    #[test]
    fn test_crud() {
        let collect = Collect::<Trigger>::new("triggers");
        assert!(collect.create(&trigger("t1", "wf")).unwrap());
        assert!(collect.create(&trigger("t1", "wf")).is_err());
        assert!(collect.exists("t1").unwrap());

        let mut t = collect.find("t1").unwrap();
        t.enabled = false;
        assert!(collect.update(&t).unwrap());
        assert!(!collect.find("t1").unwrap().enabled);
        assert!(!collect.update(&trigger("ghost", "wf")).unwrap());

        assert!(collect.delete("t1").unwrap());
        assert!(collect.find("t1").is_err());
    }

    #[test]
    fn test_query_filters_and_pages() {
        let collect = Collect::<Trigger>::new("triggers");
        for i in 0..5 {
            collect.create(&trigger(&format!("t{}", i), if i % 2 == 0 { "even" } else { "odd" })).unwrap();
        }
        let page = collect.query(&q().eq("wid", "even")).unwrap();
        assert_eq!(page.count, 3);
        assert_eq!(page.rows.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), vec!["t0", "t2", "t4"]);

        let page = collect.query(&q().limit(2).offset(2)).unwrap();
        assert_eq!(page.count, 5);
        assert_eq!(page.page_num, 2);
        assert_eq!(page.page_count, 3);
        assert_eq!(page.rows.len(), 2);
    }
}
