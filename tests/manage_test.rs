//! Manager behavior: registration rules, table packing, config
//! loading, status dumps, and durability across a full restart.

mod common;

use std::time::Duration;

use shoal_db::{
    Config, ErrorKind, EventProcess, JobContext, Manage, ShoalResult,
};

fn h_noop(_ctx: &mut JobContext, _value: &[u8]) -> ShoalResult {
    Ok(())
}

fn h_write_both(ctx: &mut JobContext, value: &[u8]) -> ShoalResult {
    ctx.set(b"kept", b"k", value)?;
    ctx.set(b"scratch", b"k", value)?;
    Ok(())
}

fn h_read_both(ctx: &mut JobContext, value: &[u8]) -> ShoalResult {
    let (reply, _) = common::unpack_value(value);
    let kept = ctx.get(b"kept", b"k")?.unwrap_or_else(|| b"<none>".to_vec());
    let scratch = ctx
        .get(b"scratch", b"k")?
        .unwrap_or_else(|| b"<none>".to_vec());
    let mut out = kept;
    out.push(b',');
    out.extend_from_slice(&scratch);
    common::send_reply(&reply, out);
    Ok(())
}

#[test]
fn test_reserved_order_names_rejected() {
    common::setup();
    let dir = common::scratch_dir("mng_reserved");
    let manage = Manage::new(&dir);

    for name in &["finish", "destroy", "destroyjob", "destroycount"] {
        let err = manage
            .add_order(name, EventProcess::new_ptr(h_noop))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidContext);
    }
    // the hooks stay available to users
    manage.add_order("init", EventProcess::new_ptr(h_noop)).unwrap();
    manage.add_order("start", EventProcess::new_ptr(h_noop)).unwrap();
}

#[test]
fn test_no_mutation_while_running() {
    common::setup();
    let dir = common::scratch_dir("mng_frozen");
    let manage = Manage::new(&dir);

    manage.add_order("o", EventProcess::new_ptr(h_noop)).unwrap();
    manage.add_table("o", "t").unwrap();
    manage.alloc_job(1).unwrap();
    manage.star_job().unwrap();

    assert!(manage.add_order("late", EventProcess::new_ptr(h_noop)).is_err());
    assert!(manage.add_table("o", "late").is_err());
    assert!(manage.set_table_weight("t", 9).is_err());
    assert!(manage.free_job().is_err());

    manage.stop_job();
    // allowed again once stopped
    manage.add_order("late", EventProcess::new_ptr(h_noop)).unwrap();
}

#[test]
fn test_parent_colocation_and_weight_split() {
    common::setup();
    let dir = common::scratch_dir("mng_packing");
    let manage = Manage::new(&dir);
    manage.set_max_table_weight(2);

    manage.add_order("o", EventProcess::new_ptr(h_noop)).unwrap();
    for table in &["a1", "a2", "a3", "a4", "child"] {
        manage.add_table("o", table).unwrap();
    }
    manage.set_table_parent("child", "a1").unwrap();
    manage.alloc_job(1).unwrap();

    let status = manage.print_all_status_json();
    let tables = status["tables"].as_array().unwrap();
    let file_of = |name: &str| -> String {
        tables
            .iter()
            .find(|t| t["table"] == name)
            .unwrap()["file"]
            .as_str()
            .unwrap()
            .to_string()
    };

    // the child follows its parent whatever the weights say
    assert_eq!(file_of("child"), file_of("a1"));

    // a weight cap of 2 forces more than one file
    let files = status["files"].as_array().unwrap();
    assert!(
        files.len() >= 2,
        "expected several files, got {}",
        files.len()
    );

    manage.destroy_handle();
}

#[test]
fn test_with_config_applies_classification() {
    common::setup();
    let dir = common::scratch_dir("mng_config");

    let raw = format!(
        r#"{{
            "db_path": "{}",
            "max_queue": 64,
            "max_table_weight": 3,
            "tables": {{
                "heavy": {{ "weight": 5 }},
                "temp": {{ "no_save": true }}
            }}
        }}"#,
        dir.display()
    );
    let config: Config = serde_json::from_str(&raw).unwrap();
    let manage = Manage::with_config(&config);

    manage.add_order("o", EventProcess::new_ptr(h_noop)).unwrap();
    manage.add_table("o", "heavy").unwrap();
    manage.add_table("o", "temp").unwrap();
    manage.alloc_job(1).unwrap();

    let status = manage.print_all_status_json();
    let tables = status["tables"].as_array().unwrap();
    let heavy = tables.iter().find(|t| t["table"] == "heavy").unwrap();
    assert_eq!(heavy["weight"], 5);
    let temp = tables.iter().find(|t| t["table"] == "temp").unwrap();
    assert_eq!(temp["no_save"], true);
    assert!(temp["file"].as_str().unwrap().contains("pnosave"));

    manage.destroy_handle();
}

#[test]
fn test_possible_alloc_groups_by_shared_tables() {
    common::setup();
    let dir = common::scratch_dir("mng_possible");
    let manage = Manage::new(&dir);

    manage.add_order("a", EventProcess::new_ptr(h_noop)).unwrap();
    manage.add_order("b", EventProcess::new_ptr(h_noop)).unwrap();
    manage.add_order("c", EventProcess::new_ptr(h_noop)).unwrap();
    manage.add_table("a", "t1").unwrap();
    manage.add_table("b", "t1").unwrap();
    manage.add_table("c", "t2").unwrap();

    let alloc = manage.print_possible_alloc_json();
    let groups = alloc["groups"].as_array().unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0]["orders"].as_array().unwrap().len(), 2);
    assert_eq!(groups[1]["orders"].as_array().unwrap().len(), 1);
}

#[test]
fn test_possible_alloc_merges_transitive_links() {
    common::setup();
    let dir = common::scratch_dir("mng_possible_transitive");
    let manage = Manage::new(&dir);

    // "a" and "b" start out in separate groups; "c" bridges them
    manage.add_order("a", EventProcess::new_ptr(h_noop)).unwrap();
    manage.add_order("b", EventProcess::new_ptr(h_noop)).unwrap();
    manage.add_order("c", EventProcess::new_ptr(h_noop)).unwrap();
    manage.add_table("a", "t1").unwrap();
    manage.add_table("b", "t2").unwrap();
    manage.add_table("c", "t1").unwrap();
    manage.add_table("c", "t2").unwrap();

    let alloc = manage.print_possible_alloc_json();
    let groups = alloc["groups"].as_array().unwrap();
    assert_eq!(groups.len(), 1);

    let orders = groups[0]["orders"].as_array().unwrap();
    assert_eq!(orders.len(), 3);
    let tables = groups[0]["tables"].as_array().unwrap();
    assert_eq!(tables.len(), 2);
}

#[test]
fn test_restart_preserves_saved_tables_only() {
    common::setup();
    let dir = common::scratch_dir("mng_restart");

    {
        let manage = Manage::new(&dir);
        manage
            .add_order("w", EventProcess::new_ptr(h_write_both))
            .unwrap();
        manage.add_table("w", "kept").unwrap();
        manage.add_table("w", "scratch").unwrap();
        manage.set_table_no_save("scratch", true).unwrap();
        manage.alloc_job(1).unwrap();
        manage.star_job().unwrap();

        manage.remote_call("w", b"durable", 0).unwrap();

        // destroyjob queues behind the write, the worker drains both;
        // the default flush pacing persists after every order
        manage.destroy_handle();
    }

    {
        let manage = Manage::new(&dir);
        manage
            .add_order("r", EventProcess::new_ptr(h_read_both))
            .unwrap();
        manage.add_table("r", "kept").unwrap();
        manage.add_table("r", "scratch").unwrap();
        manage.set_table_no_save("scratch", true).unwrap();
        manage.alloc_job(1).unwrap();
        manage.star_job().unwrap();

        let reply = common::register_reply("mng_restart");
        manage
            .remote_call("r", &common::pack_value("mng_restart", b""), 0)
            .unwrap();
        assert_eq!(
            reply.recv_timeout(Duration::from_secs(5)).unwrap(),
            b"durable,<none>".to_vec()
        );

        manage.destroy_handle();
    }
}

#[test]
fn test_job_status_shape() {
    common::setup();
    let dir = common::scratch_dir("mng_status");
    let manage = Manage::new(&dir);

    manage.add_order("o", EventProcess::new_ptr(h_noop)).unwrap();
    manage.add_table("o", "t").unwrap();
    manage.alloc_job(2).unwrap();

    let status = manage.print_all_job_status_json();
    let jobs = status["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 2);

    let details = manage.print_all_job_details_json();
    let jobs = details["jobs"].as_array().unwrap();
    let with_order = jobs
        .iter()
        .find(|j| !j["orders"].as_array().unwrap().is_empty())
        .unwrap();
    assert_eq!(with_order["orders"][0], "o");
    assert_eq!(with_order["tables"][0], "t");

    manage.destroy_handle();
}
