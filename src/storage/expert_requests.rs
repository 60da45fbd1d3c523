use redb::ReadableTable;

use super::db::{Database, DatabaseError, Guarded};
use super::models::{ExpertRequest, ExpertRequestStatus};
use super::tables::*;

impl Database {
    // ========================================================================
    // Expert request operations
    // ========================================================================

    /// Insert a request unless the same user already has one pending.
    /// Returns `false` without writing in that case.
    pub fn create_expert_request(&self, request: &ExpertRequest) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let created = {
            let mut table = write_txn.open_table(EXPERT_REQUESTS)?;

            let mut has_pending = false;
            for result in table.iter()? {
                let (_, value) = result?;
                let existing: ExpertRequest = rmp_serde::from_slice(value.value())?;
                if existing.user_id == request.user_id
                    && existing.status == ExpertRequestStatus::Pending
                {
                    has_pending = true;
                    break;
                }
            }

            if has_pending {
                false
            } else {
                let data = rmp_serde::to_vec_named(request)?;
                table.insert(request.id.as_str(), data.as_slice())?;
                true
            }
        };

        if created {
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }
        Ok(created)
    }

    pub fn get_expert_request(&self, id: &str) -> Result<Option<ExpertRequest>, DatabaseError> {
        self.get_record(EXPERT_REQUESTS, id)
    }

    pub fn modify_expert_request<E, F>(
        &self,
        id: &str,
        f: F,
    ) -> Result<Guarded<ExpertRequest, E>, DatabaseError>
    where
        F: FnOnce(&mut ExpertRequest) -> Result<(), E>,
    {
        self.modify_record(EXPERT_REQUESTS, id, f)
    }

    /// List requests, optionally by status, oldest first
    pub fn list_expert_requests(
        &self,
        status: Option<ExpertRequestStatus>,
    ) -> Result<Vec<ExpertRequest>, DatabaseError> {
        let mut requests: Vec<ExpertRequest> = self
            .all_records::<ExpertRequest>(EXPERT_REQUESTS)?
            .into_iter()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .collect();
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(requests)
    }
}
