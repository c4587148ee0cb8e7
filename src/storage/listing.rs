//! Shared list/pagination algorithm (spec §3, §4.3, §4.5, §9) used
//! identically by [`crate::storage::memory`] and [`crate::storage::file`] so
//! cursor/delimiter/limit semantics never drift between backends.

use super::traits::{ListRequest, ListResult, StorageError, StoredKeyRecord};
use crate::collation;
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Apply prefix/start/end filtering, numeric-aware sort, cursor resumption,
/// delimiter collapsing, and the limit cap to an already-expiration-filtered
/// set of key records.
///
/// Delimiter-collapsed prefixes occupy a slot in the page the same way a key
/// does (an explicit, documented policy choice — see `SPEC_FULL.md`).
pub fn apply(request: &ListRequest, mut entries: Vec<StoredKeyRecord>) -> Result<ListResult, StorageError> {
    if matches!(request.limit, Some(0)) {
        return Err(StorageError::InvalidLimit);
    }
    let limit = request.limit.unwrap_or(usize::MAX);

    entries.retain(|e| {
        if let Some(p) = &request.prefix {
            if !e.name.starts_with(p.as_str()) {
                return false;
            }
        }
        if let Some(ep) = &request.exclude_prefix {
            if e.name.starts_with(ep.as_str()) {
                return false;
            }
        }
        if let Some(s) = &request.start {
            if collation::compare(&e.name, s) == Ordering::Less {
                return false;
            }
        }
        if let Some(end) = &request.end {
            if collation::compare(&e.name, end) != Ordering::Less {
                return false;
            }
        }
        true
    });

    collation::sort_by_key(&mut entries, |e| e.name.as_str());
    if request.reverse {
        entries.reverse();
    }

    if let Some(cursor) = &request.cursor {
        if !cursor.is_empty() {
            let resume_at = entries.iter().position(|e| {
                if request.reverse {
                    collation::compare(&e.name, cursor) == Ordering::Less
                } else {
                    collation::compare(&e.name, cursor) == Ordering::Greater
                }
            });
            entries = match resume_at {
                Some(idx) => entries.split_off(idx),
                None => Vec::new(),
            };
        }
    }

    let prefix_len = request.prefix.as_deref().unwrap_or("").len();
    let mut keys = Vec::new();
    let mut delimited_prefixes: BTreeSet<String> = BTreeSet::new();
    let mut count = 0usize;
    let mut last_consumed: Option<String> = None;
    let mut i = 0usize;

    while i < entries.len() && count < limit {
        let entry = &entries[i];

        if let Some(delim) = &request.delimiter {
            if prefix_len <= entry.name.len() {
                if let Some(rel) = entry.name[prefix_len..].find(delim.as_str()) {
                    let collapsed_len = prefix_len + rel + delim.len();
                    let collapsed = entry.name[..collapsed_len].to_string();

                    let mut j = i;
                    while j < entries.len() && entries[j].name.starts_with(&collapsed) {
                        j += 1;
                    }
                    last_consumed = Some(entries[j - 1].name.clone());

                    if delimited_prefixes.insert(collapsed) {
                        count += 1;
                    }
                    i = j;
                    continue;
                }
            }
        }

        last_consumed = Some(entry.name.clone());
        keys.push(entry.clone());
        count += 1;
        i += 1;
    }

    let cursor = if i >= entries.len() {
        String::new()
    } else {
        last_consumed.unwrap_or_default()
    };

    Ok(ListResult {
        keys,
        cursor,
        delimited_prefixes: request.delimiter.as_ref().map(|_| delimited_prefixes),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(name: &str) -> StoredKeyRecord {
        StoredKeyRecord {
            name: name.to_string(),
            expiration: None,
            metadata: None,
        }
    }

    #[test]
    fn prefix_and_sort() {
        let entries = vec![rec("b/2"), rec("a/1"), rec("b/10"), rec("b/1")];
        let request = ListRequest {
            prefix: Some("b/".into()),
            ..Default::default()
        };
        let result = apply(&request, entries).unwrap();
        let names: Vec<_> = result.keys.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, vec!["b/1", "b/2", "b/10"]);
        assert_eq!(result.cursor, "");
    }

    #[test]
    fn limit_and_cursor_pagination() {
        let entries = vec![rec("a"), rec("b"), rec("c"), rec("d")];
        let request = ListRequest {
            limit: Some(2),
            ..Default::default()
        };
        let page1 = apply(&request, entries.clone()).unwrap();
        assert_eq!(
            page1.keys.iter().map(|k| k.name.clone()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(page1.cursor, "b");

        let request2 = ListRequest {
            limit: Some(2),
            cursor: Some(page1.cursor.clone()),
            ..Default::default()
        };
        let page2 = apply(&request2, entries).unwrap();
        assert_eq!(
            page2.keys.iter().map(|k| k.name.clone()).collect::<Vec<_>>(),
            vec!["c", "d"]
        );
        assert_eq!(page2.cursor, "");
    }

    #[test]
    fn delimiter_collapses_into_common_prefixes() {
        let entries = vec![
            rec("dir/a"),
            rec("dir/b"),
            rec("other"),
            rec("dir2/c"),
        ];
        let request = ListRequest {
            delimiter: Some("/".into()),
            ..Default::default()
        };
        let result = apply(&request, entries).unwrap();
        let names: Vec<_> = result.keys.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, vec!["other"]);
        let prefixes = result.delimited_prefixes.unwrap();
        assert!(prefixes.contains("dir/"));
        assert!(prefixes.contains("dir2/"));
    }

    #[test]
    fn delimiter_collapse_resumes_past_whole_group_on_next_page() {
        let entries = vec![rec("dir/a"), rec("dir/b"), rec("dir/c"), rec("zzz")];
        let request = ListRequest {
            delimiter: Some("/".into()),
            limit: Some(1),
            ..Default::default()
        };
        let page1 = apply(&request, entries.clone()).unwrap();
        assert_eq!(page1.keys.len(), 0);
        assert!(page1.delimited_prefixes.unwrap().contains("dir/"));
        assert_eq!(page1.cursor, "dir/c");

        let request2 = ListRequest {
            delimiter: Some("/".into()),
            limit: Some(1),
            cursor: Some(page1.cursor),
            ..Default::default()
        };
        let page2 = apply(&request2, entries).unwrap();
        let names: Vec<_> = page2.keys.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, vec!["zzz"]);
        assert_eq!(page2.cursor, "");
    }

    #[test]
    fn zero_limit_is_invalid() {
        let request = ListRequest {
            limit: Some(0),
            ..Default::default()
        };
        assert!(matches!(apply(&request, vec![]), Err(StorageError::InvalidLimit)));
    }

    #[test]
    fn reverse_order() {
        let entries = vec![rec("a"), rec("b"), rec("c")];
        let request = ListRequest {
            reverse: true,
            ..Default::default()
        };
        let result = apply(&request, entries).unwrap();
        let names: Vec<_> = result.keys.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, vec!["c", "b", "a"]);
    }
}
