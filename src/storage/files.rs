use std::collections::BTreeSet;

use chrono::Utc;
use redb::{ReadableTable, Table, WriteTransaction};

use super::db::{Database, DatabaseError};
use super::models::{FileRecord, NewFile};
use super::tables::*;
use crate::ordering::{self, MoveError};

type FilesTable<'txn> = Table<'txn, &'static str, &'static [u8]>;

impl Database {
    // ========================================================================
    // Reads
    // ========================================================================

    /// Get a file by its UUID
    pub fn get_file(&self, id: &str) -> Result<Option<FileRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(FILES)?;
        load_record(&table, id)
    }

    /// Get a file by its share link (resolves token -> uuid -> file)
    pub fn get_file_by_share_link(
        &self,
        share_link: &str,
    ) -> Result<Option<FileRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let links = read_txn.open_table(SHARE_LINKS)?;

        let id = match links.get(share_link)? {
            Some(data) => data.value().to_string(),
            None => return Ok(None),
        };

        let table = read_txn.open_table(FILES)?;
        load_record(&table, &id)
    }

    /// All files of one owner, ordered by position
    pub fn list_files_by_owner(&self, owner: &str) -> Result<Vec<FileRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let index = read_txn.open_table(OWNER_FILES)?;
        let ids = owner_file_ids(&index, owner)?;

        let table = read_txn.open_table(FILES)?;
        let mut files = load_records(&table, &ids)?;
        files.sort_by_key(|f| f.position);
        Ok(files)
    }

    // ========================================================================
    // Create / delete
    // ========================================================================

    /// Insert a new file at the end of its owner's ordering.
    pub fn create_file(&self, new: NewFile) -> Result<FileRecord, DatabaseError> {
        let write_txn = self.begin_write()?;

        let mut ids = {
            let index = write_txn.open_table(OWNER_FILES)?;
            let ids = owner_file_ids(&index, &new.owner)?;
            ids
        };

        let now = Utc::now();
        let file = FileRecord {
            id: uuid::Uuid::new_v4().to_string(),
            owner: new.owner,
            position: ids.len() as u32,
            original_name: new.original_name,
            stored_name: new.stored_name,
            mime_type: new.mime_type,
            media_type: new.media_type,
            byte_size: new.byte_size,
            created_at: now,
            updated_at: now,
            tags: new.tags,
            views: 0,
            share_link: None,
        };

        {
            let mut table = write_txn.open_table(FILES)?;
            store_record(&mut table, &file)?;
        }
        ids.push(file.id.clone());
        write_owner_index(&write_txn, &file.owner, &ids)?;

        write_txn.commit()?;
        Ok(file)
    }

    /// Delete one of `owner`'s files, drop its indexes and compact the
    /// positions of the files that came after it. Returns the removed record.
    pub fn delete_file(
        &self,
        owner: &str,
        id: &str,
    ) -> Result<Option<FileRecord>, DatabaseError> {
        let write_txn = self.begin_write()?;

        let mut files = load_owner_files(&write_txn, owner)?;
        let Some(index) = files.iter().position(|f| f.id == id) else {
            write_txn.abort()?;
            return Ok(None);
        };
        let removed = files.remove(index);

        let changed = ordering::close_gap(&mut files, removed.position);
        {
            let mut table = write_txn.open_table(FILES)?;
            table.remove(removed.id.as_str())?;
            let now = Utc::now();
            for i in changed {
                files[i].updated_at = now;
                store_record(&mut table, &files[i])?;
            }
        }

        if let Some(ref token) = removed.share_link {
            let mut links = write_txn.open_table(SHARE_LINKS)?;
            links.remove(token.as_str())?;
        }

        let ids: Vec<String> = files.iter().map(|f| f.id.clone()).collect();
        write_owner_index(&write_txn, owner, &ids)?;

        write_txn.commit()?;
        Ok(Some(removed))
    }

    // ========================================================================
    // Ordering
    // ========================================================================

    /// Move one of `owner`'s files to `new_position`, shifting the files in
    /// between, and return the owner's files ordered by position.
    ///
    /// The read, the shift and the write happen in one write transaction, so
    /// concurrent moves never interleave and a failed move changes nothing.
    pub fn move_file(
        &self,
        owner: &str,
        id: &str,
        new_position: u32,
    ) -> Result<Vec<FileRecord>, MoveError> {
        let write_txn = self.begin_write()?;
        let mut files = load_owner_files(&write_txn, owner)?;

        let plan = match ordering::plan_move(&files, id, new_position) {
            Ok(plan) => plan,
            Err(e) => {
                write_txn.abort().map_err(DatabaseError::from)?;
                return Err(e);
            }
        };

        if plan.is_noop() {
            write_txn.abort().map_err(DatabaseError::from)?;
        } else {
            let changed = ordering::apply_move(&mut files, id, plan);
            {
                let mut table = write_txn.open_table(FILES).map_err(DatabaseError::from)?;
                let now = Utc::now();
                for i in changed {
                    files[i].updated_at = now;
                    store_record(&mut table, &files[i])?;
                }
            }
            write_txn.commit().map_err(DatabaseError::from)?;
        }

        files.sort_by_key(|f| f.position);
        debug_assert!(ordering::is_dense(&files), "owner ordering lost density");
        Ok(files)
    }

    // ========================================================================
    // Views and sharing
    // ========================================================================

    /// Increment a file's view counter and return the updated record.
    pub fn record_view(&self, id: &str) -> Result<Option<FileRecord>, DatabaseError> {
        self.update_file(id, |_| true, |file| file.views += 1)
    }

    /// Resolve a share link, increment the file's view counter and return the
    /// updated record.
    pub fn record_share_view(
        &self,
        share_link: &str,
    ) -> Result<Option<FileRecord>, DatabaseError> {
        let write_txn = self.begin_write()?;

        let id = {
            let links = write_txn.open_table(SHARE_LINKS)?;
            let id = links.get(share_link)?.map(|v| v.value().to_string());
            id
        };
        let Some(id) = id else {
            write_txn.abort()?;
            return Ok(None);
        };

        let file = {
            let mut table = write_txn.open_table(FILES)?;
            match load_record(&table, &id)? {
                Some(mut file) => {
                    file.views += 1;
                    store_record(&mut table, &file)?;
                    Some(file)
                }
                None => None,
            }
        };

        write_txn.commit()?;
        Ok(file)
    }

    /// Return the file's share link, minting a new unique token on first use.
    pub fn ensure_share_link(
        &self,
        owner: &str,
        id: &str,
    ) -> Result<Option<String>, DatabaseError> {
        let write_txn = self.begin_write()?;

        let existing = {
            let table = write_txn.open_table(FILES)?;
            let file = load_record(&table, id)?.filter(|f| f.owner == owner);
            file
        };
        let Some(mut file) = existing else {
            write_txn.abort()?;
            return Ok(None);
        };

        if let Some(token) = file.share_link.clone() {
            write_txn.abort()?;
            return Ok(Some(token));
        }

        let token = {
            let mut links = write_txn.open_table(SHARE_LINKS)?;
            let token = loop {
                let candidate = uuid::Uuid::new_v4().simple().to_string();
                if links.get(candidate.as_str())?.is_none() {
                    break candidate;
                }
            };
            links.insert(token.as_str(), file.id.as_str())?;
            token
        };

        file.share_link = Some(token.clone());
        file.updated_at = Utc::now();
        {
            let mut table = write_txn.open_table(FILES)?;
            store_record(&mut table, &file)?;
        }

        write_txn.commit()?;
        Ok(Some(token))
    }

    // ========================================================================
    // Tags
    // ========================================================================

    /// Replace the tag set of one of `owner`'s files.
    pub fn replace_tags(
        &self,
        owner: &str,
        id: &str,
        tags: BTreeSet<String>,
    ) -> Result<Option<FileRecord>, DatabaseError> {
        self.update_owned(owner, id, |file| file.tags = tags)
    }

    /// Add a tag to one of `owner`'s files. Adding an existing tag is a no-op.
    pub fn add_tag(
        &self,
        owner: &str,
        id: &str,
        tag: &str,
    ) -> Result<Option<FileRecord>, DatabaseError> {
        self.update_owned(owner, id, |file| {
            file.tags.insert(tag.to_string());
        })
    }

    /// Remove a tag from one of `owner`'s files.
    pub fn remove_tag(
        &self,
        owner: &str,
        id: &str,
        tag: &str,
    ) -> Result<Option<FileRecord>, DatabaseError> {
        self.update_owned(owner, id, |file| {
            file.tags.remove(tag);
        })
    }

    fn update_owned<F>(
        &self,
        owner: &str,
        id: &str,
        apply: F,
    ) -> Result<Option<FileRecord>, DatabaseError>
    where
        F: FnOnce(&mut FileRecord),
    {
        self.update_file(
            id,
            |file| file.owner == owner,
            |file| {
                apply(file);
                file.updated_at = Utc::now();
            },
        )
    }

    /// Read-modify-write of a single record inside one write transaction.
    /// Records rejected by `filter` are reported as missing.
    fn update_file<P, F>(
        &self,
        id: &str,
        filter: P,
        apply: F,
    ) -> Result<Option<FileRecord>, DatabaseError>
    where
        P: FnOnce(&FileRecord) -> bool,
        F: FnOnce(&mut FileRecord),
    {
        let write_txn = self.begin_write()?;

        let updated = {
            let mut table = write_txn.open_table(FILES)?;
            match load_record(&table, id)?.filter(|f| filter(f)) {
                Some(mut file) => {
                    apply(&mut file);
                    store_record(&mut table, &file)?;
                    Some(file)
                }
                None => None,
            }
        };

        match updated {
            Some(file) => {
                write_txn.commit()?;
                Ok(Some(file))
            }
            None => {
                write_txn.abort()?;
                Ok(None)
            }
        }
    }
}

// ============================================================================
// Transaction helpers
// ============================================================================

fn load_record<T>(table: &T, id: &str) -> Result<Option<FileRecord>, DatabaseError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(id)? {
        Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
        None => Ok(None),
    }
}

fn load_records<T>(table: &T, ids: &[String]) -> Result<Vec<FileRecord>, DatabaseError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let mut files = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(file) = load_record(table, id)? {
            files.push(file);
        }
    }
    Ok(files)
}

fn store_record(table: &mut FilesTable<'_>, file: &FileRecord) -> Result<(), DatabaseError> {
    let data = rmp_serde::to_vec_named(file)?;
    table.insert(file.id.as_str(), data.as_slice())?;
    Ok(())
}

fn owner_file_ids<T>(index: &T, owner: &str) -> Result<Vec<String>, DatabaseError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    match index.get(owner)? {
        Some(data) => Ok(rmp_serde::from_slice(data.value())?),
        None => Ok(Vec::new()),
    }
}

fn load_owner_files(
    write_txn: &WriteTransaction,
    owner: &str,
) -> Result<Vec<FileRecord>, DatabaseError> {
    let ids = {
        let index = write_txn.open_table(OWNER_FILES)?;
        let ids = owner_file_ids(&index, owner)?;
        ids
    };
    let table = write_txn.open_table(FILES)?;
    load_records(&table, &ids)
}

fn write_owner_index(
    write_txn: &WriteTransaction,
    owner: &str,
    ids: &[String],
) -> Result<(), DatabaseError> {
    let mut index = write_txn.open_table(OWNER_FILES)?;
    if ids.is_empty() {
        index.remove(owner)?;
    } else {
        let data = rmp_serde::to_vec_named(ids)?;
        index.insert(owner, data.as_slice())?;
    }
    Ok(())
}
