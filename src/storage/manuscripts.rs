use redb::{ReadableTable, WriteTransaction};

use super::db::{Database, DatabaseError, Guarded};
use super::models::Manuscript;
use super::tables::*;
use crate::state_machine::ManuscriptStatus;

/// Listing filter; `None` fields match everything
#[derive(Debug, Clone, Copy, Default)]
pub struct ManuscriptFilter<'a> {
    pub author_id: Option<&'a str>,
    pub reviewer_id: Option<&'a str>,
    pub status: Option<ManuscriptStatus>,
}

impl Database {
    // ========================================================================
    // Manuscript operations
    // ========================================================================

    /// Store a manuscript record and update the author index
    pub fn put_manuscript(&self, manuscript: &Manuscript) -> Result<(), DatabaseError> {
        debug_assert!(!manuscript.id.is_empty(), "manuscript id must not be empty");

        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(MANUSCRIPTS)?;
            let data = rmp_serde::to_vec_named(manuscript)?;
            table.insert(manuscript.id.as_str(), data.as_slice())?;

            let mut author_table = write_txn.open_table(AUTHOR_MANUSCRIPTS)?;
            let mut ids: Vec<String> = match author_table.get(manuscript.author_id.as_str())? {
                Some(v) => rmp_serde::from_slice(v.value())?,
                None => Vec::new(),
            };

            if !ids.contains(&manuscript.id) {
                ids.push(manuscript.id.clone());
                let index_data = rmp_serde::to_vec_named(&ids)?;
                author_table.insert(manuscript.author_id.as_str(), index_data.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Get a manuscript by its UUID
    pub fn get_manuscript(&self, id: &str) -> Result<Option<Manuscript>, DatabaseError> {
        self.get_record(MANUSCRIPTS, id)
    }

    /// Guarded update. The author is fixed at creation and restored if `f`
    /// touches it.
    pub fn modify_manuscript<E, F>(
        &self,
        id: &str,
        f: F,
    ) -> Result<Guarded<Manuscript, E>, DatabaseError>
    where
        F: FnOnce(&mut Manuscript) -> Result<(), E>,
    {
        self.modify_record(MANUSCRIPTS, id, |manuscript: &mut Manuscript| {
            let author_id = manuscript.author_id.clone();
            let result = f(manuscript);
            manuscript.author_id = author_id;
            result
        })
    }

    /// Guarded delete: the record is removed only if `guard` accepts it.
    /// Returns the removed record so the caller can clean up its blobs.
    pub fn delete_manuscript_if<E, F>(
        &self,
        id: &str,
        guard: F,
    ) -> Result<Guarded<Manuscript, E>, DatabaseError>
    where
        F: FnOnce(&Manuscript) -> Result<(), E>,
    {
        let write_txn = self.begin_write()?;

        let existing: Option<Manuscript> = {
            let table = write_txn.open_table(MANUSCRIPTS)?;
            let result = match table.get(id)? {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            };
            result
        };

        let outcome = match existing {
            None => Guarded::Missing,
            Some(manuscript) => match guard(&manuscript) {
                Err(e) => Guarded::Rejected(e),
                Ok(()) => {
                    {
                        let mut table = write_txn.open_table(MANUSCRIPTS)?;
                        table.remove(id)?;
                    }
                    remove_from_author_index(&write_txn, &manuscript.author_id, id)?;
                    Guarded::Applied(manuscript)
                }
            },
        };

        if matches!(outcome, Guarded::Applied(_)) {
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }
        Ok(outcome)
    }

    /// Get all manuscripts for an author
    pub fn get_manuscripts_by_author(
        &self,
        author_id: &str,
    ) -> Result<Vec<Manuscript>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let author_table = read_txn.open_table(AUTHOR_MANUSCRIPTS)?;
        let table = read_txn.open_table(MANUSCRIPTS)?;

        let ids: Vec<String> = match author_table.get(author_id)? {
            Some(data) => rmp_serde::from_slice(data.value())?,
            None => return Ok(Vec::new()),
        };

        let mut manuscripts = Vec::new();
        for id in ids {
            if let Some(data) = table.get(id.as_str())? {
                manuscripts.push(rmp_serde::from_slice(data.value())?);
            }
        }
        Ok(manuscripts)
    }

    /// Get all manuscripts
    pub fn get_all_manuscripts(&self) -> Result<Vec<Manuscript>, DatabaseError> {
        self.all_records(MANUSCRIPTS)
    }

    /// List manuscripts matching a filter, newest first
    pub fn list_manuscripts(
        &self,
        filter: ManuscriptFilter<'_>,
    ) -> Result<Vec<Manuscript>, DatabaseError> {
        // Use the author index when filtering by author
        let all = match filter.author_id {
            Some(author_id) => self.get_manuscripts_by_author(author_id)?,
            None => self.get_all_manuscripts()?,
        };

        let mut matching: Vec<Manuscript> = all
            .into_iter()
            .filter(|m| {
                filter
                    .reviewer_id
                    .map_or(true, |r| m.reviewer_id.as_deref() == Some(r))
            })
            .filter(|m| filter.status.map_or(true, |s| m.status == s))
            .collect();

        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    /// Published manuscripts, most recently published first
    pub fn list_published(&self) -> Result<Vec<Manuscript>, DatabaseError> {
        let mut published = self.list_manuscripts(ManuscriptFilter {
            status: Some(ManuscriptStatus::Published),
            ..Default::default()
        })?;
        published.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        Ok(published)
    }
}

fn remove_from_author_index(
    write_txn: &WriteTransaction,
    author_id: &str,
    manuscript_id: &str,
) -> Result<(), DatabaseError> {
    let mut author_table = write_txn.open_table(AUTHOR_MANUSCRIPTS)?;
    let ids: Option<Vec<String>> = match author_table.get(author_id)? {
        Some(data) => Some(rmp_serde::from_slice(data.value())?),
        None => None,
    };

    if let Some(mut ids) = ids {
        ids.retain(|id| id != manuscript_id);
        if ids.is_empty() {
            author_table.remove(author_id)?;
        } else {
            let data = rmp_serde::to_vec_named(&ids)?;
            author_table.insert(author_id, data.as_slice())?;
        }
    }
    Ok(())
}
