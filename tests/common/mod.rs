//! Shared scaffolding for the scenario tests: log setup, scratch
//! directories, and a reply registry so fn-pointer handlers can hand
//! results back to the test thread.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::Mutex,
};

use crossbeam::channel::{unbounded, Receiver, Sender};
use once_cell::sync::Lazy;

pub fn setup() {
    shoal_db::utils::init_log();
}

/// A fresh directory under the target temp dir, wiped per test.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("shoal_tests").join(name);
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

static REPLIES: Lazy<Mutex<HashMap<String, Sender<Vec<u8>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Register a reply slot; handlers answer through [`send_reply`].
pub fn register_reply(key: &str) -> Receiver<Vec<u8>> {
    let (sender, receiver) = unbounded();
    REPLIES.lock().unwrap().insert(key.to_string(), sender);
    receiver
}

pub fn send_reply(key: &str, value: Vec<u8>) {
    if let Some(sender) = REPLIES.lock().unwrap().get(key) {
        let _ = sender.send(value);
    }
}

/// Order values in these tests are `reply_key|payload`.
pub fn pack_value(reply_key: &str, payload: &[u8]) -> Vec<u8> {
    let mut value = reply_key.as_bytes().to_vec();
    value.push(b'|');
    value.extend_from_slice(payload);
    value
}

pub fn unpack_value(value: &[u8]) -> (String, Vec<u8>) {
    let split = value.iter().position(|b| *b == b'|').unwrap();
    (
        String::from_utf8(value[..split].to_vec()).unwrap(),
        value[split + 1..].to_vec(),
    )
}
