//! The api a handler sees. One context per handler invocation, bound
//! to the worker running it; contexts never cross threads.

use std::any::Any;

use crate::{
    error::ShoalError,
    page::TableType,
    table::Direction,
    types::{KvPair, ShoalResult},
};

use super::Worker;

pub struct JobContext<'a> {
    pub(crate) job: &'a mut Worker,
}

impl<'a> JobContext<'a> {
    // ------------------------------------------------------------------
    // plain keys
    // ------------------------------------------------------------------

    pub fn set(&mut self, table: &[u8], key: &[u8], value: &[u8]) -> ShoalResult {
        self.job.with_table_write(table, |t| t.set(key, value))
    }

    pub fn multi_set(&mut self, table: &[u8], pairs: &[(Vec<u8>, Vec<u8>)]) -> ShoalResult {
        self.job.with_table_write(table, |t| t.multi_set(pairs))
    }

    pub fn set_if_no_exist(
        &mut self,
        table: &[u8],
        key: &[u8],
        value: &[u8],
    ) -> Result<bool, ShoalError> {
        self.job
            .with_table_write(table, |t| t.set_if_no_exist(key, value))
    }

    pub fn get(&mut self, table: &[u8], key: &[u8]) -> Result<Option<Vec<u8>>, ShoalError> {
        self.job.with_table_read(table, |t| t.get(key))
    }

    pub fn multi_get(
        &mut self,
        table: &[u8],
        keys: &[Vec<u8>],
    ) -> Result<Vec<KvPair>, ShoalError> {
        self.job.with_table_read(table, |t| t.multi_get(keys))
    }

    pub fn del(&mut self, table: &[u8], key: &[u8]) -> Result<bool, ShoalError> {
        self.job.with_table_write(table, |t| t.del(key))
    }

    pub fn rename(
        &mut self,
        table: &[u8],
        old_key: &[u8],
        new_key: &[u8],
    ) -> Result<bool, ShoalError> {
        self.job
            .with_table_write(table, |t| t.rename(old_key, new_key))
    }

    pub fn length(&mut self, table: &[u8]) -> Result<u32, ShoalError> {
        self.job.with_table_read(table, |t| t.length())
    }

    pub fn is_key_exist(&mut self, table: &[u8], key: &[u8]) -> Result<bool, ShoalError> {
        self.job.with_table_read(table, |t| t.is_key_exist(key))
    }

    pub fn table_clear(&mut self, table: &[u8]) -> ShoalResult {
        self.job.with_table_write(table, |t| t.table_clear())
    }

    pub fn table_type(&mut self, table: &[u8]) -> Result<TableType, ShoalError> {
        self.job.with_table_read(table, |t| t.table_type())
    }

    pub fn set_table_type(&mut self, table: &[u8], table_type: TableType) -> ShoalResult {
        self.job
            .with_table_write(table, |t| t.set_table_type(table_type))
    }

    pub fn set_table_type_if_byte(
        &mut self,
        table: &[u8],
        table_type: TableType,
    ) -> Result<bool, ShoalError> {
        self.job
            .with_table_write(table, |t| t.set_table_type_if_byte(table_type))
    }

    // ------------------------------------------------------------------
    // scans
    // ------------------------------------------------------------------

    pub fn members(&mut self, table: &[u8]) -> Result<Vec<KvPair>, ShoalError> {
        self.job.with_table_read(table, |t| t.members())
    }

    pub fn rand(&mut self, table: &[u8]) -> Result<Option<KvPair>, ShoalError> {
        self.job.with_table_read(table, |t| t.rand())
    }

    pub fn order(
        &mut self,
        table: &[u8],
        direction: Direction,
        limit: u32,
    ) -> Result<Vec<KvPair>, ShoalError> {
        self.job
            .with_table_read(table, |t| t.order(direction, limit))
    }

    pub fn rang(
        &mut self,
        table: &[u8],
        begin: &[u8],
        end: &[u8],
    ) -> Result<Vec<KvPair>, ShoalError> {
        self.job.with_table_read(table, |t| t.rang(begin, end))
    }

    pub fn point(
        &mut self,
        table: &[u8],
        begin: &[u8],
        direction: Direction,
        offset: u32,
    ) -> Result<Option<KvPair>, ShoalError> {
        self.job
            .with_table_read(table, |t| t.point(begin, direction, offset))
    }

    pub fn pattern(
        &mut self,
        table: &[u8],
        begin: &[u8],
        end: &[u8],
        pattern: &[u8],
    ) -> Result<Vec<KvPair>, ShoalError> {
        self.job
            .with_table_read(table, |t| t.pattern(begin, end, pattern))
    }

    pub fn limit(
        &mut self,
        table: &[u8],
        key: &[u8],
        left: u32,
        right: u32,
    ) -> Result<Vec<KvPair>, ShoalError> {
        self.job.with_table_read(table, |t| t.limit(key, left, right))
    }

    // ------------------------------------------------------------------
    // nested sets
    // ------------------------------------------------------------------

    pub fn s_add(&mut self, table: &[u8], key: &[u8], member: &[u8]) -> ShoalResult {
        self.job.with_table_write(table, |t| t.s_add(key, member))
    }

    pub fn s_del(&mut self, table: &[u8], key: &[u8], members: &[Vec<u8>]) -> ShoalResult {
        self.job.with_table_write(table, |t| t.s_del(key, members))
    }

    pub fn s_pop(&mut self, table: &[u8], key: &[u8]) -> Result<Option<Vec<u8>>, ShoalError> {
        self.job.with_table_write(table, |t| t.s_pop(key))
    }

    pub fn s_members(&mut self, table: &[u8], key: &[u8]) -> Result<Vec<Vec<u8>>, ShoalError> {
        self.job.with_table_read(table, |t| t.s_members(key))
    }

    pub fn s_rand(&mut self, table: &[u8], key: &[u8]) -> Result<Option<Vec<u8>>, ShoalError> {
        self.job.with_table_read(table, |t| t.s_rand(key))
    }

    pub fn s_rang(
        &mut self,
        table: &[u8],
        key: &[u8],
        begin: &[u8],
        end: &[u8],
    ) -> Result<Vec<Vec<u8>>, ShoalError> {
        self.job
            .with_table_read(table, |t| t.s_rang(key, begin, end))
    }

    pub fn s_rang_count(
        &mut self,
        table: &[u8],
        key: &[u8],
        begin: &[u8],
        end: &[u8],
    ) -> Result<u32, ShoalError> {
        self.job
            .with_table_read(table, |t| t.s_rang_count(key, begin, end))
    }

    pub fn s_point(
        &mut self,
        table: &[u8],
        key: &[u8],
        begin: &[u8],
        direction: Direction,
        offset: u32,
    ) -> Result<Option<Vec<u8>>, ShoalError> {
        self.job
            .with_table_read(table, |t| t.s_point(key, begin, direction, offset))
    }

    pub fn s_limit(
        &mut self,
        table: &[u8],
        key: &[u8],
        member: &[u8],
        left: u32,
        right: u32,
    ) -> Result<Vec<Vec<u8>>, ShoalError> {
        self.job
            .with_table_read(table, |t| t.s_limit(key, member, left, right))
    }

    pub fn s_length(&mut self, table: &[u8], key: &[u8]) -> Result<u32, ShoalError> {
        self.job.with_table_read(table, |t| t.s_length(key))
    }

    pub fn s_is_key_exist(
        &mut self,
        table: &[u8],
        key: &[u8],
        member: &[u8],
    ) -> Result<bool, ShoalError> {
        self.job
            .with_table_read(table, |t| t.s_is_member(key, member))
    }

    pub fn s_union(
        &mut self,
        table: &[u8],
        keys: &[Vec<u8>],
    ) -> Result<Vec<Vec<u8>>, ShoalError> {
        self.job.with_table_read(table, |t| t.s_union(keys))
    }

    pub fn s_union_store(&mut self, table: &[u8], keys: &[Vec<u8>], dest: &[u8]) -> ShoalResult {
        self.job
            .with_table_write(table, |t| t.s_union_store(keys, dest))
    }

    pub fn s_inter(
        &mut self,
        table: &[u8],
        keys: &[Vec<u8>],
    ) -> Result<Vec<Vec<u8>>, ShoalError> {
        self.job.with_table_read(table, |t| t.s_inter(keys))
    }

    pub fn s_inter_store(&mut self, table: &[u8], keys: &[Vec<u8>], dest: &[u8]) -> ShoalResult {
        self.job
            .with_table_write(table, |t| t.s_inter_store(keys, dest))
    }

    pub fn s_diff(
        &mut self,
        table: &[u8],
        keys: &[Vec<u8>],
    ) -> Result<Vec<Vec<u8>>, ShoalError> {
        self.job.with_table_read(table, |t| t.s_diff(keys))
    }

    pub fn s_diff_store(&mut self, table: &[u8], keys: &[Vec<u8>], dest: &[u8]) -> ShoalResult {
        self.job
            .with_table_write(table, |t| t.s_diff_store(keys, dest))
    }

    pub fn s_move(
        &mut self,
        table: &[u8],
        src: &[u8],
        dest: &[u8],
        member: &[u8],
    ) -> ShoalResult {
        self.job
            .with_table_write(table, |t| t.s_move(src, dest, member))
    }

    // ------------------------------------------------------------------
    // worker controls
    // ------------------------------------------------------------------

    /// Fire-and-forget call to another order; never blocks on the
    /// target worker.
    pub fn remote_call(&mut self, order: &str, value: &[u8]) -> ShoalResult {
        self.job.remote_call(order, value.to_vec(), 0)
    }

    pub fn remote_call_with_order_id(
        &mut self,
        order: &str,
        value: &[u8],
        order_id: u32,
    ) -> ShoalResult {
        self.job.remote_call(order, value.to_vec(), order_id)
    }

    /// Schedule an order `delay_secs` from now.
    pub fn add_timer(&mut self, delay_secs: f64, order: &str, value: &[u8]) {
        self.job.add_timer(delay_secs, order, value.to_vec(), 0);
    }

    pub fn add_timer_with_order_id(
        &mut self,
        delay_secs: f64,
        order: &str,
        value: &[u8],
        order_id: u32,
    ) {
        self.job.add_timer(delay_secs, order, value.to_vec(), order_id);
    }

    /// Commit and flush right now, ahead of the finish hook.
    pub fn force_commit(&mut self) {
        self.job.force_commit();
    }

    /// Skip the commit this order would otherwise get.
    pub fn set_donot_commit(&mut self) {
        self.job.set_donot_commit();
    }

    /// Skip the flush pacing check after this order.
    pub fn set_donot_flush(&mut self) {
        self.job.set_donot_flush();
    }

    pub fn current_order(&self) -> Option<&str> {
        self.job.current_order()
    }

    pub fn current_order_id(&self) -> u32 {
        self.job.current_order_id()
    }

    /// Mint a tracked order id bound to an external continuation.
    pub fn create_order_id(&mut self, ptr: Box<dyn Any + Send>) -> Result<u32, ShoalError> {
        self.job.create_order_id(ptr)
    }

    pub fn order_id_ptr(&self) -> Option<&(dyn Any + Send)> {
        self.job.order_id_ptr()
    }

    pub fn set_order_id_ptr(&mut self, ptr: Box<dyn Any + Send>) {
        self.job.set_order_id_ptr(ptr);
    }

    pub fn remove_order_id(&mut self) {
        self.job.remove_order_id();
    }

    /// Tables mapped to this worker.
    pub fn table_names(&self) -> Vec<String> {
        self.job.table_names()
    }

    /// Exit state machine: 1 drains and stops, 2 also notifies the
    /// manager, 3 publishes a value through the destroy channel.
    pub fn set_exit_thread(&mut self, state: u8) {
        self.job.exit_thread = state;
    }
}
