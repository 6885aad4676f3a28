mod context;
mod order;
mod stat;
mod timer;

pub use context::JobContext;
pub use order::{
    compose_order_id, order_id_job, order_id_ticket, EventProcess, OrderPacket, ProcessKind,
    QueueRef, RoutingFn, ScriptEngine, MAX_JOB_ID, MAX_ORDER_TICKET,
};

use std::{
    any::Any,
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info};

use crate::{
    cache::PageCache,
    disk::DiskHandle,
    error::{ErrorKind, ShoalError},
    manage::{Manage, ManageEvent},
    table::TableHandle,
    types::{Pod, ShoalResult},
    utils::{current_millis, current_secs, HandyRwLock},
};

use order::MAX_ORDER_TICKET as TICKET_LIMIT;
use stat::JobStat;
use timer::TimerList;

/// Default flush pacing: persist after every finished order, or after
/// five minutes, whichever the handler lets through.
const DEFAULT_FLUSH_COUNT: u32 = 1;
const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 300;

/// Push unless the queue is over its cap; 0 means unbounded.
pub(crate) fn push_packet(
    sender: &Sender<OrderPacket>,
    packet: OrderPacket,
    max_queue: u32,
) -> ShoalResult {
    if max_queue > 0 && sender.len() >= max_queue as usize {
        return Err(ShoalError::new(
            ErrorKind::QueueFull,
            &format!("queue past its cap of {}", max_queue),
        ));
    }
    sender
        .send(packet)
        .or_else(|_| Err(ShoalError::new(ErrorKind::QueueFull, "queue receiver is gone")))
}

/// One worker thread: an event queue, the handlers and caches of its
/// partition, and the per-order transaction pipeline.
pub struct Worker {
    job_id: u32,
    receiver: Receiver<OrderPacket>,
    sender: Sender<OrderPacket>,

    order_process: HashMap<String, Arc<EventProcess>>,
    order_queue: HashMap<String, QueueRef>,
    table_caches: HashMap<String, Pod<PageCache>>,
    /// Tables whose cache this worker owns for writing.
    write_tables: HashSet<String>,
    /// One cache per file this worker owns.
    disk_caches: Vec<Pod<PageCache>>,

    /// Caches touched by the current order, pending commit.
    tran_cache: Vec<Pod<PageCache>>,
    /// Committed caches pending flush. Commit is the only way in.
    tran_flush: Vec<Pod<PageCache>>,

    donot_commit: bool,
    donot_flush: bool,
    flush_last_stamp: u64,
    flush_interval_secs: u64,
    flush_last_count: u32,
    flush_count: u32,

    timers: TimerList,
    exit_thread: u8,
    exit_value: Vec<u8>,
    stat: JobStat,
    max_queue: u32,
    all_weight: u32,

    current_order: Option<String>,
    current_order_id: u32,
    next_ticket: u32,
    order_id_ptr: HashMap<u32, Box<dyn Any + Send>>,

    manage: Option<Arc<Manage>>,
}

fn order_destroy(ctx: &mut JobContext, value: &[u8]) -> ShoalResult {
    debug!("job {} received destroy", ctx.job.job_id);
    ctx.job.exit_value = value.to_vec();
    ctx.job.exit_thread = 3;
    Ok(())
}

fn order_destroy_job(ctx: &mut JobContext, _value: &[u8]) -> ShoalResult {
    debug!("job {} received destroyjob", ctx.job.job_id);
    ctx.job.exit_thread = 1;
    Ok(())
}

fn order_finish(ctx: &mut JobContext, _value: &[u8]) -> ShoalResult {
    ctx.job.finish_order();
    Ok(())
}

impl Worker {
    pub fn new(job_id: u32, max_queue: u32, stat_enabled: bool, stat_check_ms: u64) -> Worker {
        let (sender, receiver) = unbounded();
        let mut worker = Worker {
            job_id,
            receiver,
            sender,
            order_process: HashMap::new(),
            order_queue: HashMap::new(),
            table_caches: HashMap::new(),
            write_tables: HashSet::new(),
            disk_caches: Vec::new(),
            tran_cache: Vec::new(),
            tran_flush: Vec::new(),
            donot_commit: false,
            donot_flush: false,
            flush_last_stamp: current_secs(),
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
            flush_last_count: 0,
            flush_count: DEFAULT_FLUSH_COUNT,
            timers: TimerList::new(),
            exit_thread: 0,
            exit_value: Vec::new(),
            stat: JobStat::new(stat_enabled, stat_check_ms, current_millis()),
            max_queue,
            all_weight: 0,
            current_order: None,
            current_order_id: 0,
            next_ticket: 0,
            order_id_ptr: HashMap::new(),
            manage: None,
        };

        worker.add_order_process("destroy", Arc::new(EventProcess::new_ptr(order_destroy)));
        worker.add_order_process(
            "destroyjob",
            Arc::new(EventProcess::new_ptr(order_destroy_job)),
        );
        worker.add_order_process("finish", Arc::new(EventProcess::new_ptr(order_finish)));
        worker
    }

    pub fn job_id(&self) -> u32 {
        self.job_id
    }

    pub fn queue_sender(&self) -> Sender<OrderPacket> {
        self.sender.clone()
    }

    pub(crate) fn set_manage(&mut self, manage: Arc<Manage>) {
        self.manage = Some(manage);
    }

    pub(crate) fn add_order_process(&mut self, order: &str, process: Arc<EventProcess>) {
        self.all_weight += process.weight;
        self.order_process.insert(order.to_string(), process);
    }

    pub(crate) fn add_order_queue(&mut self, order: &str, queue: QueueRef) {
        self.order_queue.insert(order.to_string(), queue);
    }

    pub(crate) fn all_weight(&self) -> u32 {
        self.all_weight
    }

    /// Whether this worker owns the table's cache. Shared read-only
    /// mappings do not count; partitioning keys off ownership.
    pub(crate) fn find_table(&self, table: &str) -> bool {
        self.write_tables.contains(table)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.table_caches.keys().cloned().collect()
    }

    /// The worker's own cache for a file, created on first use.
    pub(crate) fn new_table_cache(&mut self, table: &str, disk: &Arc<DiskHandle>) -> Pod<PageCache> {
        let existing = self
            .disk_caches
            .iter()
            .find(|cache| Arc::ptr_eq(cache.rl().disk(), disk))
            .cloned();
        let cache = match existing {
            Some(cache) => cache,
            None => {
                let cache: Pod<PageCache> =
                    Arc::new(std::sync::RwLock::new(PageCache::new(disk.clone())));
                self.disk_caches.push(cache.clone());
                cache
            }
        };
        self.table_caches.insert(table.to_string(), cache.clone());
        self.write_tables.insert(table.to_string());
        cache
    }

    /// A read-only view of a cache another worker owns.
    pub(crate) fn add_shared_table_cache(&mut self, table: &str, cache: Pod<PageCache>) {
        self.table_caches
            .entry(table.to_string())
            .or_insert(cache);
    }

    // ------------------------------------------------------------------
    // event loop
    // ------------------------------------------------------------------

    pub fn run(mut self) {
        info!("job {} starts", self.job_id);

        if let Some(process) = self.order_process.get("init").cloned() {
            if let Err(e) = self.run_handler(&process, &[]) {
                error!("job {} init hook failed: {}", self.job_id, e);
            }
        }

        loop {
            let first = match self.timers.next_deadline() {
                None => match self.receiver.recv() {
                    Ok(packet) => Some(packet),
                    Err(_) => break,
                },
                Some(deadline) => {
                    let wait = deadline.saturating_sub(current_millis()).max(1);
                    match self.receiver.recv_timeout(Duration::from_millis(wait)) {
                        Ok(packet) => Some(packet),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            };

            self.fire_due_timers();

            if let Some(packet) = first {
                self.handle_packet(packet);
            }
            while self.exit_thread == 0 {
                match self.receiver.try_recv() {
                    Ok(packet) => {
                        self.fire_due_timers();
                        self.handle_packet(packet);
                    }
                    Err(_) => break,
                }
            }

            if self.exit_thread != 0 {
                break;
            }
        }

        // pending persists go out before the thread does
        self.flush_tran();

        let exit_thread = self.exit_thread;
        if let Some(manage) = &self.manage {
            if exit_thread == 3 {
                manage.notify(ManageEvent::DestroyCount(std::mem::replace(
                    &mut self.exit_value,
                    Vec::new(),
                )));
            }
            manage.notify(ManageEvent::JobExit(self.job_id));
        }
        info!("job {} exits with state {}", self.job_id, exit_thread);
    }

    fn handle_packet(&mut self, packet: OrderPacket) {
        self.stat.note_queue_len(self.receiver.len());

        if let Some(process) = self.order_process.get("start").cloned() {
            if let Err(e) = self.run_handler(&process, &[]) {
                error!("job {} start hook failed: {}", self.job_id, e);
            }
        }

        let process = match self.order_process.get(&packet.order).cloned() {
            Some(process) => Some(process),
            None => self
                .manage
                .as_ref()
                .and_then(|manage| manage.get_process(&packet.order)),
        };
        let process = match process {
            Some(process) => process,
            None => {
                error!("job {}: no process for order {}", self.job_id, packet.order);
                return;
            }
        };

        debug!("job {} runs order {}", self.job_id, packet.order);
        self.current_order = Some(packet.order.clone());
        self.current_order_id = packet.order_id;

        if let Err(e) = self.run_handler(&process, &packet.value) {
            error!(
                "job {}: order {} failed ({}), transaction rolls back",
                self.job_id, packet.order, e
            );
            self.rollback_tran();
        }

        if let Some(finish) = self.order_process.get("finish").cloned() {
            if let Err(e) = self.run_handler(&finish, &[]) {
                error!("job {} finish hook failed: {}", self.job_id, e);
            }
        }

        self.stat
            .record_run(self.current_order.as_deref(), packet.value.len());
        self.stat.maybe_emit(self.job_id, current_millis());

        self.current_order = None;
        self.current_order_id = 0;
    }

    fn run_handler(&mut self, process: &Arc<EventProcess>, value: &[u8]) -> ShoalResult {
        match &process.kind {
            ProcessKind::Ptr(f) => {
                let mut ctx = JobContext { job: self };
                f(&mut ctx, value)
            }
            ProcessKind::Script { file, function } => {
                let engine = self.manage.as_ref().and_then(|m| m.script_engine());
                match engine {
                    Some(engine) => {
                        let mut ctx = JobContext { job: self };
                        engine.call(file, function, &mut ctx, value)
                    }
                    None => Err(ShoalError::new(
                        ErrorKind::InvalidContext,
                        &format!("script order {}::{} but no script engine", file, function),
                    )),
                }
            }
            ProcessKind::Lib { file, function } => {
                let engine = self.manage.as_ref().and_then(|m| m.lib_engine());
                match engine {
                    Some(engine) => {
                        let mut ctx = JobContext { job: self };
                        engine.call(file, function, &mut ctx, value)
                    }
                    None => Err(ShoalError::new(
                        ErrorKind::InvalidContext,
                        &format!("lib order {}::{} but no library engine", file, function),
                    )),
                }
            }
        }
    }

    fn fire_due_timers(&mut self) {
        if self.timers.is_empty() {
            return;
        }
        for timer in self.timers.take_due(current_millis()) {
            if let Err(e) = self.remote_call(&timer.order, timer.value, timer.order_id) {
                error!("job {}: timed order {} dropped: {}", self.job_id, timer.order, e);
            }
        }
    }

    // ------------------------------------------------------------------
    // transaction pipeline
    // ------------------------------------------------------------------

    fn join_tran(&mut self, cache: &Pod<PageCache>) {
        if !self.tran_cache.iter().any(|c| Arc::ptr_eq(c, cache)) {
            self.tran_cache.push(cache.clone());
        }
    }

    pub(crate) fn commit_tran(&mut self) {
        for cache in self.tran_cache.drain(..).collect::<Vec<_>>() {
            cache.wl().commit();
            if !self.tran_flush.iter().any(|c| Arc::ptr_eq(c, &cache)) {
                self.tran_flush.push(cache);
            }
        }
    }

    pub(crate) fn flush_tran(&mut self) {
        for cache in self.tran_flush.drain(..) {
            if let Err(e) = cache.wl().flush() {
                error!("job {}: flush failed: {}", self.job_id, e);
            }
        }
    }

    pub(crate) fn rollback_tran(&mut self) {
        for cache in self.tran_cache.drain(..) {
            cache.wl().rollback();
        }
    }

    /// Commit-or-skip plus paced flush, after every order.
    pub(crate) fn finish_order(&mut self) {
        if !self.donot_commit {
            self.commit_tran();
        } else {
            self.donot_commit = false;
        }

        if !self.donot_flush {
            self.flush_last_count += 1;
            let now = current_secs();
            if self.flush_last_count >= self.flush_count {
                self.flush_last_count = 0;
                self.flush_tran();
            } else if now.saturating_sub(self.flush_last_stamp) > self.flush_interval_secs {
                self.flush_last_stamp = now;
                self.flush_tran();
            }
        } else {
            self.donot_flush = false;
        }
    }

    pub(crate) fn force_commit(&mut self) {
        self.commit_tran();
        self.flush_tran();
    }

    pub(crate) fn set_donot_commit(&mut self) {
        self.donot_commit = true;
    }

    pub(crate) fn set_donot_flush(&mut self) {
        self.donot_flush = true;
    }

    // ------------------------------------------------------------------
    // table access gates
    // ------------------------------------------------------------------

    fn cache_permits_write(&self, table: &str) -> bool {
        self.write_tables.contains(table)
    }

    fn table_is_in_order(&self, table: &str) -> bool {
        match (&self.manage, &self.current_order) {
            (Some(manage), Some(order)) => manage.order_declares_table(order, table),
            // standalone workers (tests) run ungated
            (None, _) => true,
            (Some(_), None) => false,
        }
    }

    pub(crate) fn with_table_write<R>(
        &mut self,
        table: &[u8],
        f: impl FnOnce(&mut TableHandle) -> Result<R, ShoalError>,
    ) -> Result<R, ShoalError> {
        let name = String::from_utf8_lossy(table).to_string();
        if !self.cache_permits_write(&name) {
            error!("job {}: table {} is not writable here", self.job_id, name);
            return Err(ShoalError::new(
                ErrorKind::UnknownTable,
                &format!("table {} is not writable in this worker", name),
            ));
        }
        if !self.table_is_in_order(&name) {
            error!(
                "job {}: order {:?} never declared table {}",
                self.job_id, self.current_order, name
            );
            return Err(ShoalError::new(
                ErrorKind::UnknownTable,
                &format!("table {} is not declared by the current order", name),
            ));
        }
        self.run_table_op(&name, table, f)
    }

    pub(crate) fn with_table_read<R>(
        &mut self,
        table: &[u8],
        f: impl FnOnce(&mut TableHandle) -> Result<R, ShoalError>,
    ) -> Result<R, ShoalError> {
        let name = String::from_utf8_lossy(table).to_string();
        self.run_table_op(&name, table, f)
    }

    fn run_table_op<R>(
        &mut self,
        name: &str,
        table: &[u8],
        f: impl FnOnce(&mut TableHandle) -> Result<R, ShoalError>,
    ) -> Result<R, ShoalError> {
        let cache = match self.table_caches.get(name) {
            Some(cache) => cache.clone(),
            None => {
                error!("job {}: table {} has no cache here", self.job_id, name);
                return Err(ShoalError::new(
                    ErrorKind::UnknownTable,
                    &format!("table {} is not mapped to this worker", name),
                ));
            }
        };
        let owned = self.write_tables.contains(name);
        let result = {
            let mut guard = cache.wl();
            // a non-owner must not observe the owner's staged shadows
            guard.set_committed_only(!owned);
            let result = guard.with_table(table, f);
            guard.set_committed_only(false);
            result
        };
        if owned && cache.rl().in_transaction() {
            self.join_tran(&cache);
        }
        result
    }

    // ------------------------------------------------------------------
    // routing, timers, order ids
    // ------------------------------------------------------------------

    pub(crate) fn remote_call(
        &mut self,
        order: &str,
        value: Vec<u8>,
        order_id: u32,
    ) -> ShoalResult {
        if let Some(queue) = self.order_queue.get(order) {
            let mut order_id = order_id;
            if order_id != 0 {
                error!(
                    "job {}: order {} lives on a shared queue, order id {} dropped",
                    self.job_id, order, order_id
                );
                order_id = 0;
            }
            return push_packet(
                &queue.sender,
                OrderPacket {
                    order: order.to_string(),
                    value,
                    order_id,
                },
                self.max_queue,
            );
        }
        match self.manage.clone() {
            Some(manage) => manage.remote_call(order, &value, order_id),
            None => Err(ShoalError::new(
                ErrorKind::UnknownOrder,
                &format!("no route for order {}", order),
            )),
        }
    }

    pub(crate) fn add_timer(&mut self, delay_secs: f64, order: &str, value: Vec<u8>, order_id: u32) {
        self.timers
            .add(current_millis(), delay_secs, order, value, order_id);
    }

    pub(crate) fn current_order(&self) -> Option<&str> {
        self.current_order.as_deref()
    }

    pub(crate) fn current_order_id(&self) -> u32 {
        self.current_order_id
    }

    /// Mint a tracked order id and bind a continuation to it.
    pub(crate) fn create_order_id(
        &mut self,
        ptr: Box<dyn Any + Send>,
    ) -> Result<u32, ShoalError> {
        if self.next_ticket + 1 >= TICKET_LIMIT {
            if self.order_id_ptr.is_empty() {
                info!("job {} order tickets wrapped", self.job_id);
                self.next_ticket = 0;
            } else {
                error!(
                    "job {}: order tickets exhausted with {} continuations live",
                    self.job_id,
                    self.order_id_ptr.len()
                );
                return Err(ShoalError::new(
                    ErrorKind::OrderIdExhausted,
                    "order ticket space exhausted",
                ));
            }
        }
        self.next_ticket += 1;
        let order_id = compose_order_id(self.job_id, self.next_ticket);
        self.order_id_ptr.insert(order_id, ptr);
        Ok(order_id)
    }

    pub(crate) fn order_id_ptr(&self) -> Option<&(dyn Any + Send)> {
        self.order_id_ptr
            .get(&self.current_order_id)
            .map(|b| b.as_ref())
    }

    pub(crate) fn set_order_id_ptr(&mut self, ptr: Box<dyn Any + Send>) {
        self.order_id_ptr.insert(self.current_order_id, ptr);
    }

    pub(crate) fn remove_order_id(&mut self) {
        self.order_id_ptr.remove(&self.current_order_id);
    }
}
