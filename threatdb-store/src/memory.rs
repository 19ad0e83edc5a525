//! In-memory reference implementation of [`ChunkStore`].
//!
//! Committed data stays untouched while an update transaction is open;
//! all writes land in a staged copy that replaces the committed state
//! only on [`finish_update`](ChunkStore::finish_update). This gives the
//! same all-or-nothing behavior a file-backed store gets from writing a
//! new file and renaming it into place.

use std::collections::BTreeSet;
use threatdb_hash::{FullHash, Prefix};
use threatdb_prefixset::PrefixSetBuilder;
use tracing::debug;

use crate::{
    AddFullHash, AddPrefix, ChunkStore, Result, StoreError, SubFullHash, SubPrefix,
};

#[derive(Debug, Clone, Default)]
struct StoreState {
    add_chunks: BTreeSet<u32>,
    sub_chunks: BTreeSet<u32>,
    add_prefixes: Vec<AddPrefix>,
    add_hashes: Vec<AddFullHash>,
    sub_prefixes: Vec<SubPrefix>,
    sub_hashes: Vec<SubFullHash>,
}

/// In-memory [`ChunkStore`].
///
/// Also serves as the test double for failure paths: the `fail_*`
/// setters make specific operations report corruption.
#[derive(Debug, Default)]
pub struct MemoryChunkStore {
    committed: StoreState,
    /// Staged copy of `committed`, present while an update is open.
    staged: Option<StoreState>,
    add_dels: BTreeSet<u32>,
    sub_dels: BTreeSet<u32>,

    fail_begin_update: bool,
    fail_finish_update: bool,
    fail_writes: bool,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `begin_update` report corruption.
    pub fn fail_begin_update(&mut self, fail: bool) {
        self.fail_begin_update = fail;
    }

    /// Make `finish_update` report corruption.
    pub fn fail_finish_update(&mut self, fail: bool) {
        self.fail_finish_update = fail;
    }

    /// Make every staged write report corruption.
    pub fn fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    fn staged_mut(&mut self) -> Result<&mut StoreState> {
        if self.fail_writes {
            return Err(StoreError::Corrupt("injected write failure".to_string()));
        }
        self.staged.as_mut().ok_or(StoreError::NoUpdateInProgress)
    }

    /// The state lookups should see: committed data, or the staged copy
    /// while a transaction is open (chunk bookkeeping must observe
    /// writes made earlier in the same transaction).
    fn current(&self) -> &StoreState {
        self.staged.as_ref().unwrap_or(&self.committed)
    }
}

impl ChunkStore for MemoryChunkStore {
    fn begin_update(&mut self) -> Result<()> {
        if self.fail_begin_update {
            return Err(StoreError::Corrupt("injected begin failure".to_string()));
        }
        if self.staged.is_some() {
            return Err(StoreError::UpdateInProgress);
        }
        self.staged = Some(self.committed.clone());
        self.add_dels.clear();
        self.sub_dels.clear();
        Ok(())
    }

    fn write_add_prefix(&mut self, chunk_id: u32, prefix: Prefix) -> Result<()> {
        self.staged_mut()?
            .add_prefixes
            .push(AddPrefix { chunk_id, prefix });
        Ok(())
    }

    fn write_add_hash(&mut self, chunk_id: u32, hash: FullHash) -> Result<()> {
        self.staged_mut()?.add_hashes.push(AddFullHash { chunk_id, hash });
        Ok(())
    }

    fn write_sub_prefix(&mut self, chunk_id: u32, add_chunk_id: u32, prefix: Prefix)
        -> Result<()> {
        self.staged_mut()?.sub_prefixes.push(SubPrefix {
            chunk_id,
            add_chunk_id,
            prefix,
        });
        Ok(())
    }

    fn write_sub_hash(&mut self, chunk_id: u32, add_chunk_id: u32, hash: FullHash) -> Result<()> {
        self.staged_mut()?.sub_hashes.push(SubFullHash {
            chunk_id,
            add_chunk_id,
            hash,
        });
        Ok(())
    }

    fn set_add_chunk(&mut self, chunk_id: u32) {
        let state = self.staged.as_mut().unwrap_or(&mut self.committed);
        state.add_chunks.insert(chunk_id);
    }

    fn check_add_chunk(&self, chunk_id: u32) -> bool {
        self.current().add_chunks.contains(&chunk_id)
    }

    fn delete_add_chunk(&mut self, chunk_id: u32) {
        self.add_dels.insert(chunk_id);
        if let Some(staged) = self.staged.as_mut() {
            staged.add_chunks.remove(&chunk_id);
        }
    }

    fn set_sub_chunk(&mut self, chunk_id: u32) {
        let state = self.staged.as_mut().unwrap_or(&mut self.committed);
        state.sub_chunks.insert(chunk_id);
    }

    fn check_sub_chunk(&self, chunk_id: u32) -> bool {
        self.current().sub_chunks.contains(&chunk_id)
    }

    fn delete_sub_chunk(&mut self, chunk_id: u32) {
        self.sub_dels.insert(chunk_id);
        if let Some(staged) = self.staged.as_mut() {
            staged.sub_chunks.remove(&chunk_id);
        }
    }

    fn add_chunks(&self) -> Vec<u32> {
        self.current().add_chunks.iter().copied().collect()
    }

    fn sub_chunks(&self) -> Vec<u32> {
        self.current().sub_chunks.iter().copied().collect()
    }

    fn add_prefixes(&self) -> Result<Vec<AddPrefix>> {
        Ok(self.committed.add_prefixes.clone())
    }

    fn add_full_hashes(&self) -> Result<Vec<AddFullHash>> {
        Ok(self.committed.add_hashes.clone())
    }

    fn finish_update(
        &mut self,
        builder: &mut PrefixSetBuilder,
        full_hashes: &mut Vec<AddFullHash>,
    ) -> Result<()> {
        let mut state = self.staged.take().ok_or(StoreError::NoUpdateInProgress)?;

        if self.fail_finish_update {
            self.add_dels.clear();
            self.sub_dels.clear();
            return Err(StoreError::Corrupt("injected finish failure".to_string()));
        }

        // Deleted chunks drop their entries wholesale.
        state
            .add_prefixes
            .retain(|a| !self.add_dels.contains(&a.chunk_id));
        state
            .add_hashes
            .retain(|a| !self.add_dels.contains(&a.chunk_id));
        state
            .sub_prefixes
            .retain(|s| !self.sub_dels.contains(&s.chunk_id));
        state
            .sub_hashes
            .retain(|s| !self.sub_dels.contains(&s.chunk_id));
        self.add_dels.clear();
        self.sub_dels.clear();

        // Knockout: a sub entry cancels an add entry carrying the same
        // prefix or hash in the add chunk the sub names. Matched subs
        // are consumed; unmatched subs persist against future adds.
        let subs = std::mem::take(&mut state.sub_prefixes);
        for sub in subs {
            let matched = state
                .add_prefixes
                .iter()
                .position(|a| a.chunk_id == sub.add_chunk_id && a.prefix == sub.prefix);
            match matched {
                Some(i) => {
                    state.add_prefixes.remove(i);
                }
                None => state.sub_prefixes.push(sub),
            }
        }

        let subs = std::mem::take(&mut state.sub_hashes);
        for sub in subs {
            let matched = state
                .add_hashes
                .iter()
                .position(|a| a.chunk_id == sub.add_chunk_id && a.hash == sub.hash);
            match matched {
                Some(i) => {
                    state.add_hashes.remove(i);
                }
                None => state.sub_hashes.push(sub),
            }
        }

        // Index construction requires the full hashes' prefixes too,
        // so that a prefix probe can route to the exception list.
        for add in &state.add_prefixes {
            builder.add_prefix(add.prefix);
        }
        for add in &state.add_hashes {
            builder.add_prefix(add.hash.prefix());
        }
        full_hashes.extend_from_slice(&state.add_hashes);

        debug!(
            add_chunks = state.add_chunks.len(),
            sub_chunks = state.sub_chunks.len(),
            prefixes = state.add_prefixes.len(),
            hashes = state.add_hashes.len(),
            "committed store update"
        );
        self.committed = state;
        Ok(())
    }

    fn cancel_update(&mut self) {
        self.staged = None;
        self.add_dels.clear();
        self.sub_dels.clear();
    }

    fn check_validity(&self) -> Result<()> {
        Ok(())
    }

    fn delete(&mut self) -> Result<()> {
        self.committed = StoreState::default();
        self.staged = None;
        self.add_dels.clear();
        self.sub_dels.clear();
        Ok(())
    }
}
