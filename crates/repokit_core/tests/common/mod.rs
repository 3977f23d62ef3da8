//! Repository contract checks shared by every store's integration tests.
#![allow(dead_code)]

use repokit_core::{Entity, Filter, Query, Repository, SortKey, Store, UnitOfWork};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub name: String,
    pub rank: i64,
    pub remote_key: Option<String>,
    pub owner: Owner,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    pub name: String,
    pub active: bool,
}

impl Entity for Item {
    type Key = String;
    const COLLECTION: &'static str = "items";

    fn key(&self) -> &String {
        &self.id
    }

    fn set_key(&mut self, key: String) {
        self.id = key;
    }
}

pub fn item(id: &str) -> Item {
    Item {
        id: id.to_string(),
        name: id.to_string(),
        rank: 0,
        remote_key: None,
        owner: Owner {
            name: "nobody".to_string(),
            active: false,
        },
    }
}

/// Item `index` of a seeded set: ranks cycle 0..3, remote keys run backwards.
pub fn numbered(index: usize, total: usize) -> Item {
    Item {
        id: format!("item-{index:02}"),
        name: format!("name-{index:02}"),
        rank: (index % 3) as i64,
        remote_key: Some(format!("rk-{:02}", total - index)),
        owner: Owner {
            name: if index % 2 == 0 { "ada" } else { "bob" }.to_string(),
            active: index % 4 == 0,
        },
    }
}

pub fn attach<S: Store<Item> + 'static>(store: S) -> (UnitOfWork, Repository<Item, S>) {
    let unit_of_work = UnitOfWork::new();
    let repository = Repository::with_unit_of_work(store, &unit_of_work);
    (unit_of_work, repository)
}

pub fn seed<S: Store<Item> + 'static>(store: S, total: usize) -> (UnitOfWork, Repository<Item, S>) {
    let (unit_of_work, repository) = attach(store);
    for index in 0..total {
        repository.add(numbered(index, total)).unwrap();
    }
    unit_of_work.commit().unwrap();
    (unit_of_work, repository)
}

fn ids(items: &[Item]) -> Vec<String> {
    items.iter().map(|item| item.id.clone()).collect()
}

pub fn check_staging_isolation<S: Store<Item> + 'static>(store: S) {
    let (unit_of_work, repository) = seed(store, 3);
    let before = repository.count_all(None).unwrap();

    repository.add(item("staged")).unwrap();
    assert_eq!(repository.find_by(&"staged".to_string()).unwrap(), None);
    assert_eq!(repository.count_all(None).unwrap(), before);

    unit_of_work.commit().unwrap();
    assert_eq!(repository.count_all(None).unwrap(), before + 1);
}

pub fn check_commit_visibility<S: Store<Item> + 'static>(store: S) {
    let (unit_of_work, repository) = attach(store);
    let mut entity = numbered(7, 10);
    entity.owner.active = true;

    repository.add(entity.clone()).unwrap();
    unit_of_work.commit().unwrap();

    assert_eq!(repository.find_by(&entity.id).unwrap(), Some(entity));
}

pub fn check_windowing<S: Store<Item> + 'static>(store: S) {
    let total = 7;
    let (_, repository) = seed(store, total);
    let all = repository.find_all(0, usize::MAX, None).unwrap();
    assert_eq!(all.len(), total);

    for (offset, limit) in [(0, 3), (2, 2), (5, 10), (7, 1), (9, 3), (3, 0)] {
        let page = repository.find_all(offset, limit, None).unwrap();
        assert_eq!(page.len(), limit.min(total.saturating_sub(offset)));
    }

    for split in 0..=total {
        let mut joined = ids(&repository.find_all(0, split, None).unwrap());
        joined.extend(ids(&repository.find_all(split, total - split, None).unwrap()));
        assert_eq!(joined, ids(&all));
    }
}

pub fn check_sorted_windows<S: Store<Item> + 'static>(store: S) {
    let (_, repository) = seed(store, 9);

    let ascending = repository
        .find_all_ascending(0, usize::MAX, None, "rank")
        .unwrap();
    assert!(ascending.windows(2).all(|pair| pair[0].rank <= pair[1].rank));
    // Ties follow the key.
    let zero_ranks: Vec<_> = ascending
        .iter()
        .filter(|item| item.rank == 0)
        .map(|item| item.id.as_str())
        .collect();
    assert_eq!(zero_ranks, vec!["item-00", "item-03", "item-06"]);

    let page = repository
        .find_all_ascending(2, 4, None, "rank")
        .unwrap();
    assert_eq!(ids(&page), ids(&ascending[2..6]));

    let descending = repository
        .find_all_descending(0, usize::MAX, None, "rank")
        .unwrap();
    assert!(descending.windows(2).all(|pair| pair[0].rank >= pair[1].rank));
    let page = repository
        .find_all_descending(1, 3, None, "rank")
        .unwrap();
    assert_eq!(ids(&page), ids(&descending[1..4]));
}

pub fn check_remote_key_ordering<S: Store<Item> + 'static>(store: S) {
    let (_, repository) = seed(store, 5);

    let ascending = repository
        .find_all_ascending(0, usize::MAX, None, "remote_key")
        .unwrap();
    let keys: Vec<_> = ascending
        .iter()
        .map(|item| item.remote_key.clone().unwrap())
        .collect();
    assert_eq!(keys, vec!["rk-01", "rk-02", "rk-03", "rk-04", "rk-05"]);

    let descending = repository
        .find_all_descending(0, 2, None, "remote_key")
        .unwrap();
    assert_eq!(ids(&descending), vec!["item-00", "item-01"]);
}

pub fn check_filter_counts<S: Store<Item> + 'static>(store: S) {
    let (_, repository) = seed(store, 12);

    let filters = vec![
        Filter::eq("rank", 1),
        Filter::ne("rank", 1),
        Filter::ge("rank", 1).and(Filter::eq("owner.name", "ada")),
        Filter::eq("owner.active", true).or(Filter::lt("rank", 1)),
        !Filter::eq("owner.active", true),
        Filter::starts_with("name", "name-0"),
        Filter::contains("remote_key", "-1"),
        Filter::eq("remote_key", serde_json::Value::Null),
        Filter::eq("id", "item-03"),
        Filter::gt("id", "item-09"),
        Filter::matches("name", r"^name-1\d$").unwrap(),
        Filter::entity(|item: &Item| item.rank * 2 == 2),
        Filter::eq("rank", 1).and(Filter::predicate(|doc| doc["owner"]["active"] == false)),
    ];

    for filter in &filters {
        let found = repository.find_all(0, usize::MAX, Some(filter)).unwrap();
        let counted = repository.count_all(Some(filter)).unwrap();
        assert_eq!(counted as usize, found.len(), "filter {filter:?}");
    }

    let rank_one = repository
        .find_all(0, usize::MAX, Some(&Filter::eq("rank", 1)))
        .unwrap();
    assert_eq!(
        ids(&rank_one),
        vec!["item-01", "item-04", "item-07", "item-10"]
    );
    assert_eq!(
        repository
            .count_all(Some(&Filter::matches("name", r"^name-1\d$").unwrap()))
            .unwrap(),
        2
    );
    assert_eq!(
        repository
            .count_all(Some(&Filter::eq("remote_key", serde_json::Value::Null)))
            .unwrap(),
        0
    );

    let windowed = repository
        .find_all(1, 2, Some(&Filter::eq("rank", 1)))
        .unwrap();
    assert_eq!(ids(&windowed), vec!["item-04", "item-07"]);
}

pub fn check_update_then_read<S: Store<Item> + 'static>(store: S) {
    let (unit_of_work, repository) = seed(store, 3);
    let key = "item-01".to_string();

    let mut updated = item("ignored");
    updated.name = "renamed".to_string();
    updated.rank = 42;
    repository.set(key.clone(), updated).unwrap();
    unit_of_work.commit().unwrap();

    let found = repository.find_by(&key).unwrap().unwrap();
    assert_eq!(found.id, key);
    assert_eq!(found.name, "renamed");
    assert_eq!(found.rank, 42);
    assert_eq!(repository.count_all(None).unwrap(), 3);
    assert_eq!(
        repository
            .count_all(Some(&Filter::eq("name", "name-01")))
            .unwrap(),
        0
    );
}

pub fn check_delete_then_read<S: Store<Item> + 'static>(store: S) {
    let (unit_of_work, repository) = seed(store, 4);
    let before = repository.count_all(None).unwrap();
    let victim = repository.find_by(&"item-02".to_string()).unwrap().unwrap();

    repository.remove(victim.clone()).unwrap();
    unit_of_work.commit().unwrap();

    assert_eq!(repository.find_by(&victim.id).unwrap(), None);
    assert_eq!(repository.count_all(None).unwrap(), before - 1);
}

pub fn check_rename_scenario<S: Store<Item> + 'static>(store: S) {
    let (unit_of_work, repository) = attach(store);

    repository.add(item("TEST_1")).unwrap();
    repository.add(item("TEST_2")).unwrap();
    unit_of_work.commit().unwrap();
    assert_eq!(repository.count_all(None).unwrap(), 2);

    let mut renamed = item("TEST_2");
    renamed.name = "TEST_2 (UPDATED)".to_string();
    repository.set("TEST_2".to_string(), renamed).unwrap();
    repository.remove(item("TEST_1")).unwrap();
    unit_of_work.commit().unwrap();

    let remaining = repository.find_all(0, usize::MAX, None).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].name, "TEST_2 (UPDATED)");
}

pub fn check_missing_lookups<S: Store<Item> + 'static>(store: S) {
    let (_, repository) = seed(store, 2);
    assert_eq!(repository.find_by(&"absent".to_string()).unwrap(), None);
    assert_eq!(repository.find_by(&String::new()).unwrap(), None);
    assert!(repository
        .find(&Query::new().offset(10).sort(SortKey::ascending("name")))
        .unwrap()
        .is_empty());
}

pub fn check_clear_all<S: Store<Item> + 'static>(store: S) {
    let (unit_of_work, repository) = seed(store, 5);
    repository.add(item("staged")).unwrap();

    assert_eq!(repository.clear_all().unwrap(), 5);
    assert_eq!(repository.count_all(None).unwrap(), 0);
    assert_eq!(repository.clear_all().unwrap(), 0);

    // Staged work is untouched and still commits.
    unit_of_work.commit().unwrap();
    assert_eq!(ids(&repository.find_all(0, usize::MAX, None).unwrap()), vec!["staged"]);
}
