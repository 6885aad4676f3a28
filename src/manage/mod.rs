//! The manager: table classification and packing, order partitioning,
//! worker lifecycle, and routing for callers outside any worker.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc, Mutex,
    },
    sync::RwLock,
    thread,
};

use crossbeam::channel::{unbounded, Receiver, Sender};
use log::{error, info};
use serde_json::json;

use crate::{
    config::Config,
    disk::DiskHandle,
    error::{ErrorKind, ShoalError},
    job::{
        order_id_job, push_packet, EventProcess, OrderPacket, QueueRef, ScriptEngine, Worker,
        MAX_JOB_ID,
    },
    page::DEFAULT_PAGE_SIZE,
    types::ShoalResult,
    utils::HandyRwLock,
};

/// Internal lifecycle orders; user orders must avoid these names.
/// `init` and `start` stay available, they are user-provided hooks.
const RESERVED_ORDERS: [&str; 4] = ["finish", "destroy", "destroyjob", "destroycount"];

pub enum ManageEvent {
    JobExit(u32),
    DestroyCount(Vec<u8>),
}

/// User-declared classification of a table.
#[derive(Debug, Clone)]
pub struct TableName {
    pub parent: Option<String>,
    pub weight: u32,
    pub no_share: bool,
    pub no_save: bool,
}

struct JobSlot {
    job_id: u32,
    sender: Sender<OrderPacket>,
    worker: Option<Worker>,
    handle: Option<thread::JoinHandle<()>>,

    // retained for status dumps after the worker moves into its thread
    orders: Vec<String>,
    tables: Vec<String>,
    weight: u32,
}

pub struct Manage {
    db_path: PathBuf,
    page_size: usize,

    max_table_weight: AtomicU32,
    max_queue: AtomicU32,
    all_no_save: AtomicBool,
    stat: AtomicBool,
    stat_check_time: AtomicU64,
    run_status: AtomicBool,

    table_names: RwLock<HashMap<String, TableName>>,
    table_disk: RwLock<HashMap<String, Arc<DiskHandle>>>,
    list_disk: RwLock<Vec<Arc<DiskHandle>>>,

    order_process: RwLock<HashMap<String, Arc<EventProcess>>>,
    order_table: RwLock<HashMap<String, HashSet<String>>>,
    list_order: RwLock<Vec<String>>,
    order_queue: RwLock<HashMap<String, QueueRef>>,

    jobs: Mutex<Vec<JobSlot>>,

    event_sender: Sender<ManageEvent>,
    event_receiver: Mutex<Receiver<ManageEvent>>,

    script_engine: RwLock<Option<Arc<dyn ScriptEngine>>>,
    lib_engine: RwLock<Option<Arc<dyn ScriptEngine>>>,
}

impl Manage {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Arc<Manage> {
        let (event_sender, event_receiver) = unbounded();
        Arc::new(Manage {
            db_path: db_path.as_ref().to_path_buf(),
            page_size: DEFAULT_PAGE_SIZE,
            max_table_weight: AtomicU32::new(1000),
            max_queue: AtomicU32::new(0),
            all_no_save: AtomicBool::new(false),
            stat: AtomicBool::new(false),
            stat_check_time: AtomicU64::new(5000),
            run_status: AtomicBool::new(false),
            table_names: RwLock::new(HashMap::new()),
            table_disk: RwLock::new(HashMap::new()),
            list_disk: RwLock::new(Vec::new()),
            order_process: RwLock::new(HashMap::new()),
            order_table: RwLock::new(HashMap::new()),
            list_order: RwLock::new(Vec::new()),
            order_queue: RwLock::new(HashMap::new()),
            jobs: Mutex::new(Vec::new()),
            event_sender,
            event_receiver: Mutex::new(event_receiver),
            script_engine: RwLock::new(None),
            lib_engine: RwLock::new(None),
        })
    }

    /// Build a handle from a parsed config, per-table classification
    /// included.
    pub fn with_config(config: &Config) -> Arc<Manage> {
        let manage = Manage::new(&config.db_path);
        manage
            .max_table_weight
            .store(config.max_table_weight, Ordering::Relaxed);
        manage.max_queue.store(config.max_queue, Ordering::Relaxed);
        manage
            .all_no_save
            .store(config.all_no_save, Ordering::Relaxed);
        manage.stat.store(config.stat, Ordering::Relaxed);
        manage
            .stat_check_time
            .store(config.stat_check_time, Ordering::Relaxed);

        for (table, tc) in &config.tables {
            let mut names = manage.table_names.wl();
            let entry = names
                .entry(table.clone())
                .or_insert_with(|| manage.default_table_name());
            if let Some(weight) = tc.weight {
                entry.weight = weight;
            }
            if let Some(no_share) = tc.no_share {
                entry.no_share = no_share;
            }
            if let Some(no_save) = tc.no_save {
                entry.no_save = no_save;
            }
            if let Some(parent) = &tc.parent {
                entry.parent = Some(parent.clone());
            }
        }
        manage
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Arc<Manage>, ShoalError> {
        Ok(Manage::with_config(&Config::from_json_file(path)?))
    }

    fn default_table_name(&self) -> TableName {
        TableName {
            parent: None,
            weight: 1,
            no_share: false,
            no_save: self.all_no_save.load(Ordering::Relaxed),
        }
    }

    fn check_not_running(&self) -> ShoalResult {
        if self.run_status.load(Ordering::Relaxed) {
            return Err(ShoalError::new(
                ErrorKind::InvalidContext,
                "not allowed while the system is running",
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // registration
    // ------------------------------------------------------------------

    pub fn add_order(&self, name: &str, process: EventProcess) -> ShoalResult {
        self.check_not_running()?;
        if RESERVED_ORDERS.contains(&name) {
            return Err(ShoalError::new(
                ErrorKind::InvalidContext,
                &format!("order name {} is reserved", name),
            ));
        }
        let mut processes = self.order_process.wl();
        if !processes.contains_key(name) {
            self.list_order.wl().push(name.to_string());
        }
        processes.insert(name.to_string(), Arc::new(process));
        Ok(())
    }

    /// Declare that `order` touches `table`.
    pub fn add_table(&self, order: &str, table: &str) -> ShoalResult {
        self.check_not_running()?;
        self.order_table
            .wl()
            .entry(order.to_string())
            .or_insert_with(HashSet::new)
            .insert(table.to_string());
        self.table_names
            .wl()
            .entry(table.to_string())
            .or_insert_with(|| self.default_table_name());
        Ok(())
    }

    fn set_table_field(
        &self,
        table: &str,
        f: impl FnOnce(&mut TableName),
    ) -> ShoalResult {
        self.check_not_running()?;
        let mut names = self.table_names.wl();
        let entry = names
            .entry(table.to_string())
            .or_insert_with(|| self.default_table_name());
        f(entry);
        Ok(())
    }

    pub fn set_table_parent(&self, table: &str, parent: &str) -> ShoalResult {
        let parent = parent.to_string();
        self.set_table_field(table, move |t| t.parent = Some(parent))
    }

    pub fn set_table_weight(&self, table: &str, weight: u32) -> ShoalResult {
        self.set_table_field(table, move |t| t.weight = weight)
    }

    pub fn set_table_no_share(&self, table: &str, no_share: bool) -> ShoalResult {
        self.set_table_field(table, move |t| t.no_share = no_share)
    }

    pub fn set_table_no_save(&self, table: &str, no_save: bool) -> ShoalResult {
        self.set_table_field(table, move |t| t.no_save = no_save)
    }

    pub fn set_max_table_weight(&self, weight: u32) {
        self.max_table_weight.store(weight, Ordering::Relaxed);
    }

    pub fn set_max_queue(&self, max_queue: u32) {
        self.max_queue.store(max_queue, Ordering::Relaxed);
    }

    pub fn set_all_no_save(&self, no_save: bool) {
        self.all_no_save.store(no_save, Ordering::Relaxed);
    }

    pub fn set_stat(&self, stat: bool) {
        self.stat.store(stat, Ordering::Relaxed);
    }

    pub fn set_stat_check_time(&self, check_time_ms: u64) {
        self.stat_check_time.store(check_time_ms, Ordering::Relaxed);
    }

    pub fn set_script_engine(&self, engine: Arc<dyn ScriptEngine>) {
        *self.script_engine.wl() = Some(engine);
    }

    pub fn set_lib_engine(&self, engine: Arc<dyn ScriptEngine>) {
        *self.lib_engine.wl() = Some(engine);
    }

    // ------------------------------------------------------------------
    // allocation
    // ------------------------------------------------------------------

    /// Open the files, pack tables into them, create `core` workers and
    /// partition the declared orders across them.
    pub fn alloc_job(self: &Arc<Self>, core: u32) -> ShoalResult {
        self.check_not_running()?;
        if core == 0 || core >= MAX_JOB_ID {
            return Err(ShoalError::new(
                ErrorKind::InvalidContext,
                &format!("worker count {} out of range", core),
            ));
        }
        self.free_job()?;

        std::fs::create_dir_all(&self.db_path)?;
        self.load_existing_files()?;

        // pack every declared table into a file
        let mut tables: Vec<String> = self.table_names.rl().keys().cloned().collect();
        tables.sort();
        for table in &tables {
            if self.table_disk.rl().contains_key(table) {
                continue;
            }
            self.add_table_to_disk(table)?;
        }

        // workers
        {
            let stat = self.stat.load(Ordering::Relaxed);
            let check = self.stat_check_time.load(Ordering::Relaxed);
            let max_queue = self.max_queue.load(Ordering::Relaxed);
            let mut jobs = self.jobs.lock().unwrap();
            for i in 0..core {
                let worker = Worker::new(i + 1, max_queue, stat, check);
                jobs.push(JobSlot {
                    job_id: i + 1,
                    sender: worker.queue_sender(),
                    worker: Some(worker),
                    handle: None,
                    orders: Vec::new(),
                    tables: Vec::new(),
                    weight: 0,
                });
            }
        }

        // partition orders over workers: one worker per group of
        // orders connected through shared tables, picked by least
        // accumulated weight. Grouping up front keeps every worker's
        // table set disjoint even when the linking order comes last.
        for (tables, group_orders) in self.group_orders_by_tables() {
            let mut tables: Vec<String> = tables.into_iter().collect();
            tables.sort();

            let mut jobs = self.jobs.lock().unwrap();
            let chosen = jobs
                .iter()
                .enumerate()
                .min_by_key(|(_, slot)| slot.worker.as_ref().unwrap().all_weight())
                .map(|(i, _)| i)
                .unwrap();

            for table in &tables {
                let disk = match self.table_disk.rl().get(table).cloned() {
                    Some(disk) => disk,
                    None => continue,
                };
                if jobs[chosen].worker.as_ref().unwrap().find_table(table) {
                    continue;
                }
                let no_share = self
                    .table_names
                    .rl()
                    .get(table)
                    .map(|t| t.no_share)
                    .unwrap_or(false);
                let cache = jobs[chosen]
                    .worker
                    .as_mut()
                    .unwrap()
                    .new_table_cache(table, &disk);
                jobs[chosen].tables.push(table.clone());
                if !no_share {
                    for i in 0..jobs.len() {
                        if i != chosen {
                            jobs[i]
                                .worker
                                .as_mut()
                                .unwrap()
                                .add_shared_table_cache(table, cache.clone());
                        }
                    }
                }
            }

            for order in group_orders {
                let process = match self.order_process.rl().get(&order).cloned() {
                    Some(process) => process,
                    None => continue,
                };
                let queue = QueueRef {
                    job_id: jobs[chosen].job_id,
                    sender: jobs[chosen].sender.clone(),
                };
                jobs[chosen]
                    .worker
                    .as_mut()
                    .unwrap()
                    .add_order_process(&order, process.clone());
                jobs[chosen].orders.push(order.clone());
                jobs[chosen].weight += process.weight;
                for slot in jobs.iter_mut() {
                    slot.worker
                        .as_mut()
                        .unwrap()
                        .add_order_queue(&order, queue.clone());
                }
                self.order_queue.wl().insert(order.clone(), queue);
            }
        }

        info!(
            "allocated {} workers over {} files",
            core,
            self.list_disk.rl().len()
        );
        Ok(())
    }

    /// Group the declared orders by shared-table reachability, in
    /// declaration order. An order touching several existing groups
    /// folds them all into the first one, so two orders only ever
    /// share a table inside one group, no matter how late the linking
    /// order was declared. Orders without a process or without tables
    /// are left out; they route dynamically.
    fn group_orders_by_tables(&self) -> Vec<(HashSet<String>, Vec<String>)> {
        let order_process = self.order_process.rl();
        let order_table = self.order_table.rl();
        let mut groups: Vec<(HashSet<String>, Vec<String>)> = Vec::new();

        for order in self.list_order.rl().iter() {
            if !order_process.contains_key(order) {
                continue;
            }
            let tables = match order_table.get(order) {
                Some(tables) if !tables.is_empty() => tables.clone(),
                _ => continue,
            };

            let mut target: Option<usize> = None;
            let mut i = 0;
            while i < groups.len() {
                if groups[i].0.is_disjoint(&tables) {
                    i += 1;
                    continue;
                }
                match target {
                    None => {
                        target = Some(i);
                        i += 1;
                    }
                    Some(first) => {
                        // this order bridges two groups, fold the later
                        // one into the first
                        let (fold_tables, fold_orders) = groups.remove(i);
                        groups[first].0.extend(fold_tables);
                        groups[first].1.extend(fold_orders);
                    }
                }
            }
            match target {
                Some(first) => {
                    groups[first].0.extend(tables);
                    groups[first].1.push(order.clone());
                }
                None => groups.push((tables, vec![order.clone()])),
            }
        }
        groups
    }

    /// Open every `p<N>` / `pnosave` file under the db path and adopt
    /// the tables they already contain.
    fn load_existing_files(&self) -> ShoalResult {
        let entries = match std::fs::read_dir(&self.db_path) {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };
        let mut paths: Vec<(String, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let is_data = name == "pnosave"
                || (name.starts_with('p') && name[1..].chars().all(|c| c.is_ascii_digit())
                    && name.len() > 1);
            if is_data {
                paths.push((name, entry.path()));
            }
        }
        paths.sort();

        for (name, path) in paths {
            let no_save = name == "pnosave";
            let disk = DiskHandle::open(&path, self.page_size, no_save)?;
            for table in disk.table_names() {
                self.table_names
                    .wl()
                    .entry(table.clone())
                    .or_insert_with(|| self.default_table_name());
                self.table_disk.wl().insert(table, disk.clone());
            }
            self.list_disk.wl().push(disk);
        }
        Ok(())
    }

    /// Pick (or open) the file that gets a table: reuse, then parent
    /// colocation, then the lightest file of the right save group, then
    /// a fresh file once the lightest is past `max_table_weight`.
    fn add_table_to_disk(&self, table: &str) -> ShoalResult {
        let tn = self
            .table_names
            .rl()
            .get(table)
            .cloned()
            .unwrap_or_else(|| self.default_table_name());

        // reuse a file that already contains the table
        {
            let list = self.list_disk.rl();
            for disk in list.iter() {
                if disk.has_table(table) {
                    self.table_disk.wl().insert(table.to_string(), disk.clone());
                    return Ok(());
                }
            }

            // colocate with the declared parent
            if let Some(parent) = &tn.parent {
                for disk in list.iter() {
                    if disk.has_table(parent) {
                        disk.create_table(table)?;
                        disk.add_table_weight(tn.weight);
                        self.table_disk.wl().insert(table.to_string(), disk.clone());
                        return Ok(());
                    }
                }
            }
        }

        let max_weight = self.max_table_weight.load(Ordering::Relaxed);
        let candidate = {
            let list = self.list_disk.rl();
            list.iter()
                .filter(|d| d.is_no_save() == tn.no_save)
                .min_by_key(|d| d.table_weight())
                .cloned()
        };

        let disk = match candidate {
            Some(disk) if disk.table_weight() < max_weight => disk,
            _ => {
                let file_name = if tn.no_save {
                    format!("pnosave{}", self.count_files(true))
                } else {
                    format!("p{}", self.count_files(false))
                };
                let file_name = if tn.no_save && self.count_files(true) == 0 {
                    "pnosave".to_string()
                } else {
                    file_name
                };
                let disk =
                    DiskHandle::open(self.db_path.join(file_name), self.page_size, tn.no_save)?;
                self.list_disk.wl().push(disk.clone());
                disk
            }
        };

        disk.create_table(table)?;
        disk.add_table_weight(tn.weight);
        self.table_disk.wl().insert(table.to_string(), disk.clone());
        Ok(())
    }

    fn count_files(&self, no_save: bool) -> usize {
        self.list_disk
            .rl()
            .iter()
            .filter(|d| d.is_no_save() == no_save)
            .count()
    }

    /// Tear down the allocation while stopped.
    pub fn free_job(&self) -> ShoalResult {
        self.check_not_running()?;
        self.jobs.lock().unwrap().clear();
        self.order_queue.wl().clear();
        for disk in self.list_disk.wl().drain(..) {
            disk.shutdown();
        }
        self.table_disk.wl().clear();
        Ok(())
    }

    // ------------------------------------------------------------------
    // lifecycle
    // ------------------------------------------------------------------

    /// Launch every allocated worker on its own thread.
    pub fn star_job(self: &Arc<Self>) -> ShoalResult {
        self.check_not_running()?;
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.is_empty() {
            return Err(ShoalError::new(
                ErrorKind::InvalidContext,
                "allocate workers before starting them",
            ));
        }
        for slot in jobs.iter_mut() {
            let mut worker = slot.worker.take().ok_or_else(|| {
                ShoalError::new(ErrorKind::InvalidContext, "worker already started")
            })?;
            worker.set_manage(self.clone());
            let name = format!("shoal-job-{}", slot.job_id);
            let handle = thread::Builder::new().name(name).spawn(move || worker.run())?;
            slot.handle = Some(handle);
        }
        self.run_status.store(true, Ordering::Relaxed);
        info!("{} workers running", jobs.len());
        Ok(())
    }

    /// Ask every worker to drain and stop, then join the threads.
    pub fn stop_job(&self) {
        if !self.run_status.swap(false, Ordering::Relaxed) {
            return;
        }
        let mut jobs = self.jobs.lock().unwrap();
        for slot in jobs.iter() {
            let packet = OrderPacket {
                order: "destroyjob".to_string(),
                value: Vec::new(),
                order_id: 0,
            };
            if let Err(e) = push_packet(&slot.sender, packet, 0) {
                error!("job {} refused destroyjob: {}", slot.job_id, e);
            }
        }
        for slot in jobs.iter_mut() {
            if let Some(handle) = slot.handle.take() {
                let _ = handle.join();
            }
        }
        // drop the exit notifications of this round
        let receiver = self.event_receiver.lock().unwrap();
        while receiver.try_recv().is_ok() {}
    }

    /// Stop everything and quiesce the file writers.
    pub fn destroy_handle(&self) {
        self.stop_job();
        let _ = self.free_job();
    }

    pub(crate) fn notify(&self, event: ManageEvent) {
        let _ = self.event_sender.send(event);
    }

    // ------------------------------------------------------------------
    // routing
    // ------------------------------------------------------------------

    /// Route an order from outside any worker.
    pub fn remote_call(&self, order: &str, value: &[u8], order_id: u32) -> ShoalResult {
        let max_queue = self.max_queue.load(Ordering::Relaxed);

        if let Some(queue) = self.order_queue.rl().get(order).cloned() {
            let mut order_id = order_id;
            if order_id != 0 {
                error!(
                    "order {} lives on a shared queue, order id {} dropped",
                    order, order_id
                );
                order_id = 0;
            }
            return push_packet(
                &queue.sender,
                OrderPacket {
                    order: order.to_string(),
                    value: value.to_vec(),
                    order_id,
                },
                max_queue,
            );
        }

        if self.order_process.rl().contains_key(order) {
            let jobs = self.jobs.lock().unwrap();
            if jobs.is_empty() {
                return Err(ShoalError::new(
                    ErrorKind::InvalidContext,
                    "no workers allocated",
                ));
            }
            let slot = if order_id != 0 {
                let target = order_id_job(order_id);
                jobs.iter().find(|s| s.job_id == target).ok_or_else(|| {
                    ShoalError::new(
                        ErrorKind::OrderIdMisuse,
                        &format!("order id {} names unknown worker {}", order_id, target),
                    )
                })?
            } else {
                let index = rand::random::<usize>() % jobs.len();
                &jobs[index]
            };
            return push_packet(
                &slot.sender,
                OrderPacket {
                    order: order.to_string(),
                    value: value.to_vec(),
                    order_id,
                },
                max_queue,
            );
        }

        error!("remote call for unknown order {}", order);
        Err(ShoalError::new(
            ErrorKind::UnknownOrder,
            &format!("unknown order {}", order),
        ))
    }

    // ------------------------------------------------------------------
    // worker-facing lookups
    // ------------------------------------------------------------------

    pub(crate) fn get_process(&self, order: &str) -> Option<Arc<EventProcess>> {
        self.order_process.rl().get(order).cloned()
    }

    pub(crate) fn order_declares_table(&self, order: &str, table: &str) -> bool {
        self.order_table
            .rl()
            .get(order)
            .map(|tables| tables.contains(table))
            .unwrap_or(false)
    }

    pub(crate) fn script_engine(&self) -> Option<Arc<dyn ScriptEngine>> {
        self.script_engine.rl().clone()
    }

    pub(crate) fn lib_engine(&self) -> Option<Arc<dyn ScriptEngine>> {
        self.lib_engine.rl().clone()
    }

    pub fn is_running(&self) -> bool {
        self.run_status.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // status dumps
    // ------------------------------------------------------------------

    pub fn print_all_status_json(&self) -> serde_json::Value {
        let tables: Vec<serde_json::Value> = {
            let names = self.table_names.rl();
            let disks = self.table_disk.rl();
            let mut keys: Vec<&String> = names.keys().collect();
            keys.sort();
            keys.iter()
                .map(|table| {
                    let tn = &names[*table];
                    json!({
                        "table": table,
                        "weight": tn.weight,
                        "no_share": tn.no_share,
                        "no_save": tn.no_save,
                        "parent": tn.parent,
                        "file": disks.get(*table).map(|d| d.path().display().to_string()),
                    })
                })
                .collect()
        };
        let files: Vec<serde_json::Value> = self
            .list_disk
            .rl()
            .iter()
            .map(|disk| {
                json!({
                    "file": disk.path().display().to_string(),
                    "weight": disk.table_weight(),
                    "pages": disk.page_count(),
                    "no_save": disk.is_no_save(),
                })
            })
            .collect();
        json!({
            "running": self.is_running(),
            "tables": tables,
            "files": files,
        })
    }

    pub fn print_all_job_status_json(&self) -> serde_json::Value {
        let jobs: Vec<serde_json::Value> = self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .map(|slot| {
                json!({
                    "job": slot.job_id,
                    "weight": slot.weight,
                    "orders": slot.orders.len(),
                    "tables": slot.tables.len(),
                    "queue": slot.sender.len(),
                })
            })
            .collect();
        json!({ "jobs": jobs })
    }

    pub fn print_all_job_details_json(&self) -> serde_json::Value {
        let jobs: Vec<serde_json::Value> = self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .map(|slot| {
                json!({
                    "job": slot.job_id,
                    "weight": slot.weight,
                    "orders": slot.orders,
                    "tables": slot.tables,
                })
            })
            .collect();
        json!({ "jobs": jobs })
    }

    pub fn print_all_job_order_json(&self) -> serde_json::Value {
        let routes: HashMap<String, u32> = self
            .order_queue
            .rl()
            .iter()
            .map(|(order, queue)| (order.clone(), queue.job_id))
            .collect();
        json!({ "orders": routes })
    }

    /// How the declared orders would group by shared tables, without
    /// allocating anything. Same grouping the partitioner uses.
    pub fn print_possible_alloc_json(&self) -> serde_json::Value {
        let groups: Vec<serde_json::Value> = self
            .group_orders_by_tables()
            .into_iter()
            .map(|(tables, orders)| {
                let mut tables: Vec<String> = tables.into_iter().collect();
                tables.sort();
                json!({ "orders": orders, "tables": tables })
            })
            .collect();
        json!({ "groups": groups })
    }

    pub fn print_all_details_json(&self) -> serde_json::Value {
        json!({
            "status": self.print_all_status_json(),
            "jobs": self.print_all_job_details_json(),
            "routes": self.print_all_job_order_json(),
        })
    }

    pub fn print_all_status(&self) {
        info!("{}", self.print_all_status_json());
    }

    pub fn print_all_job_status(&self) {
        info!("{}", self.print_all_job_status_json());
    }
}

impl Drop for Manage {
    fn drop(&mut self) {
        self.stop_job();
        for disk in self.list_disk.wl().drain(..) {
            disk.shutdown();
        }
    }
}
