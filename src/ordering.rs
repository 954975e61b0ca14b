//! Per-owner file ordering.
//!
//! Every owner's files carry a zero-based position, and the positions of one
//! owner's files always form the dense range `0..n`. Moving a file shifts only
//! the band of files between its old and new position; every other file keeps
//! its position. The functions here are pure: the store loads the owner's
//! records inside a write transaction, applies a [`MovePlan`] to them and
//! writes back the records reported as changed.

use thiserror::Error;

use crate::storage::models::FileRecord;
use crate::storage::DatabaseError;

#[derive(Debug, Error)]
pub enum MoveError {
    #[error("File not found")]
    NotFound,
    #[error("position {position} is out of range for {len} files")]
    InvalidPosition { position: u32, len: usize },
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// A single move of one file from `from` to `to` within its owner's ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovePlan {
    pub from: u32,
    pub to: u32,
}

impl MovePlan {
    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }

    /// Position that a file other than the moved one ends up at.
    pub fn shifted(&self, position: u32) -> u32 {
        if self.from < self.to && position > self.from && position <= self.to {
            position - 1
        } else if self.from > self.to && position >= self.to && position < self.from {
            position + 1
        } else {
            position
        }
    }
}

/// Validate a move of `file_id` to `new_position` against one owner's files.
///
/// `files` must hold exactly the owner's records, in any order.
pub fn plan_move(
    files: &[FileRecord],
    file_id: &str,
    new_position: u32,
) -> Result<MovePlan, MoveError> {
    let target = files
        .iter()
        .find(|f| f.id == file_id)
        .ok_or(MoveError::NotFound)?;

    if new_position as usize >= files.len() {
        return Err(MoveError::InvalidPosition {
            position: new_position,
            len: files.len(),
        });
    }

    Ok(MovePlan {
        from: target.position,
        to: new_position,
    })
}

/// Apply `plan` in place and return the indexes of the records whose
/// position changed.
pub fn apply_move(files: &mut [FileRecord], file_id: &str, plan: MovePlan) -> Vec<usize> {
    let mut changed = Vec::new();
    if plan.is_noop() {
        return changed;
    }

    for (index, file) in files.iter_mut().enumerate() {
        let next = if file.id == file_id {
            plan.to
        } else {
            plan.shifted(file.position)
        };
        if next != file.position {
            file.position = next;
            changed.push(index);
        }
    }
    changed
}

/// Close the gap left by a file removed from `removed_position`. Returns the
/// indexes of the records that moved up by one.
pub fn close_gap(files: &mut [FileRecord], removed_position: u32) -> Vec<usize> {
    let mut changed = Vec::new();
    for (index, file) in files.iter_mut().enumerate() {
        if file.position > removed_position {
            file.position -= 1;
            changed.push(index);
        }
    }
    changed
}

/// True when the positions are exactly `0..n` with no gaps or duplicates.
pub fn is_dense(files: &[FileRecord]) -> bool {
    let mut seen = vec![false; files.len()];
    for file in files {
        match seen.get_mut(file.position as usize) {
            Some(slot) if !*slot => *slot = true,
            _ => return false,
        }
    }
    true
}
