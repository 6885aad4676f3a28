//! Nested sets: a `SetHead` entry whose inline value is a complete
//! `TableInFile`. Every operation locates the parent entry, runs the
//! base table operation against the embedded record, then drops the
//! parent entry if the set emptied. Because the embedded record is
//! addressed through the cache like everything else, mutations land in
//! place with no explicit write-back.

use crate::{
    error::{ErrorKind, ShoalError},
    io::Encodeable,
    page::{PageRef, TableInFile, TableType, ValueType},
    types::ShoalResult,
    utils::readable_key,
};

use super::{key_cmp, Direction, TableHandle};

impl<'a> TableHandle<'a> {
    /// Run `f` against the set stored under `key`. With `create` the
    /// parent entry springs into existence first; without it a missing
    /// set yields `None`.
    fn with_set<R>(
        &mut self,
        key: &[u8],
        create: bool,
        f: impl FnOnce(&mut TableHandle) -> Result<R, ShoalError>,
    ) -> Result<Option<R>, ShoalError> {
        let located = match self.locate(key)? {
            Some(located) => {
                if located.key.value_type != ValueType::SetHead {
                    return Err(ShoalError::new(
                        ErrorKind::NotFound,
                        &format!("key {} does not hold a set", readable_key(key)),
                    ));
                }
                located
            }
            None => {
                if !create {
                    return Ok(None);
                }
                let tif = TableInFile::empty(TableType::Byte, true);
                self.insert_new(key, &tif.encode(), ValueType::SetHead)?;
                self.locate(key)?.ok_or_else(|| {
                    ShoalError::corrupt("set head vanished right after insert")
                })?
            }
        };

        let loc = PageRef::new(
            located.elem_ref.addr,
            Self::value_offset_of(located.elem.key_offset, &located.key),
        );
        let mut nested = TableHandle::new(&mut *self.cache, key.to_vec(), loc);
        Ok(Some(f(&mut nested)?))
    }

    /// Delete the parent entry once its set holds nothing.
    fn drop_set_if_empty(&mut self, key: &[u8]) -> ShoalResult {
        let len = self.with_set(key, false, |set| set.length())?;
        if let Some(0) = len {
            self.del(key)?;
        }
        Ok(())
    }

    pub fn s_add(&mut self, key: &[u8], member: &[u8]) -> ShoalResult {
        self.with_set(key, true, |set| set.set_if_no_exist(member, b""))?;
        Ok(())
    }

    /// Remove members; the set itself goes when the last member does.
    pub fn s_del(&mut self, key: &[u8], members: &[Vec<u8>]) -> ShoalResult {
        let found = self.with_set(key, false, |set| {
            for member in members {
                set.del(member)?;
            }
            Ok(())
        })?;
        if found.is_some() {
            self.drop_set_if_empty(key)?;
        }
        Ok(())
    }

    /// Remove and return a random member.
    pub fn s_pop(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, ShoalError> {
        let popped = self.with_set(key, false, |set| {
            let picked = set.rand()?;
            match picked {
                Some((member, _)) => {
                    set.del(&member)?;
                    Ok(Some(member))
                }
                None => Ok(None),
            }
        })?;
        let popped = match popped {
            Some(popped) => popped,
            None => return Ok(None),
        };
        self.drop_set_if_empty(key)?;
        Ok(popped)
    }

    pub fn s_members(&mut self, key: &[u8]) -> Result<Vec<Vec<u8>>, ShoalError> {
        let members = self.with_set(key, false, |set| {
            Ok(set.members()?.into_iter().map(|(k, _)| k).collect())
        })?;
        Ok(members.unwrap_or_default())
    }

    pub fn s_rand(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, ShoalError> {
        let picked = self.with_set(key, false, |set| set.rand())?;
        Ok(picked.flatten().map(|(member, _)| member))
    }

    pub fn s_rang(
        &mut self,
        key: &[u8],
        begin: &[u8],
        end: &[u8],
    ) -> Result<Vec<Vec<u8>>, ShoalError> {
        let members = self.with_set(key, false, |set| {
            Ok(set.rang(begin, end)?.into_iter().map(|(k, _)| k).collect())
        })?;
        Ok(members.unwrap_or_default())
    }

    pub fn s_rang_count(
        &mut self,
        key: &[u8],
        begin: &[u8],
        end: &[u8],
    ) -> Result<u32, ShoalError> {
        let count = self.with_set(key, false, |set| {
            Ok(set.rang(begin, end)?.len() as u32)
        })?;
        Ok(count.unwrap_or(0))
    }

    pub fn s_point(
        &mut self,
        key: &[u8],
        begin: &[u8],
        direction: Direction,
        offset: u32,
    ) -> Result<Option<Vec<u8>>, ShoalError> {
        let found = self.with_set(key, false, |set| set.point(begin, direction, offset))?;
        Ok(found.flatten().map(|(member, _)| member))
    }

    pub fn s_limit(
        &mut self,
        key: &[u8],
        member: &[u8],
        left: u32,
        right: u32,
    ) -> Result<Vec<Vec<u8>>, ShoalError> {
        let members = self.with_set(key, false, |set| {
            Ok(set
                .limit(member, left, right)?
                .into_iter()
                .map(|(k, _)| k)
                .collect())
        })?;
        Ok(members.unwrap_or_default())
    }

    pub fn s_length(&mut self, key: &[u8]) -> Result<u32, ShoalError> {
        let len = self.with_set(key, false, |set| set.length())?;
        Ok(len.unwrap_or(0))
    }

    pub fn s_is_member(&mut self, key: &[u8], member: &[u8]) -> Result<bool, ShoalError> {
        let found = self.with_set(key, false, |set| set.is_key_exist(member))?;
        Ok(found.unwrap_or(false))
    }

    /// Union of the named sets, in key order.
    pub fn s_union(&mut self, keys: &[Vec<u8>]) -> Result<Vec<Vec<u8>>, ShoalError> {
        let mut out: Vec<Vec<u8>> = Vec::new();
        for key in keys {
            out.extend(self.s_members(key)?);
        }
        out.sort_by(|a, b| key_cmp(a, b));
        out.dedup();
        Ok(out)
    }

    /// Members present in every named set.
    pub fn s_inter(&mut self, keys: &[Vec<u8>]) -> Result<Vec<Vec<u8>>, ShoalError> {
        let first = match keys.first() {
            Some(first) => first,
            None => return Ok(Vec::new()),
        };
        let mut out = self.s_members(first)?;
        for key in &keys[1..] {
            let mut kept = Vec::new();
            for member in out {
                if self.s_is_member(key, &member)? {
                    kept.push(member);
                }
            }
            out = kept;
        }
        Ok(out)
    }

    /// Members of the first set that are in none of the others.
    pub fn s_diff(&mut self, keys: &[Vec<u8>]) -> Result<Vec<Vec<u8>>, ShoalError> {
        let first = match keys.first() {
            Some(first) => first,
            None => return Ok(Vec::new()),
        };
        let mut out = self.s_members(first)?;
        for key in &keys[1..] {
            let mut kept = Vec::new();
            for member in out {
                if !self.s_is_member(key, &member)? {
                    kept.push(member);
                }
            }
            out = kept;
        }
        Ok(out)
    }

    fn store_members(&mut self, dest: &[u8], members: Vec<Vec<u8>>) -> ShoalResult {
        if self.locate(dest)?.is_some() {
            self.del(dest)?;
        }
        for member in members {
            self.s_add(dest, &member)?;
        }
        Ok(())
    }

    pub fn s_union_store(&mut self, keys: &[Vec<u8>], dest: &[u8]) -> ShoalResult {
        let members = self.s_union(keys)?;
        self.store_members(dest, members)
    }

    pub fn s_inter_store(&mut self, keys: &[Vec<u8>], dest: &[u8]) -> ShoalResult {
        let members = self.s_inter(keys)?;
        self.store_members(dest, members)
    }

    pub fn s_diff_store(&mut self, keys: &[Vec<u8>], dest: &[u8]) -> ShoalResult {
        let members = self.s_diff(keys)?;
        self.store_members(dest, members)
    }

    /// Move one member between sets; a no-op when `src` lacks it.
    pub fn s_move(&mut self, src: &[u8], dest: &[u8], member: &[u8]) -> ShoalResult {
        if !self.s_is_member(src, member)? {
            return Ok(());
        }
        self.s_del(src, &[member.to_vec()])?;
        self.s_add(dest, member)
    }
}
