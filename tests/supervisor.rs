mod common;

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use wavepool::config::ProcessConfig;
use wavepool::message::Envelope;
use wavepool::packet::HEADER_LEN;
use wavepool::queue::Priority;
use wavepool::supervisor::{Status, Supervisor};
use wavepool::transform::{EchoTransform, Transform, TransformFactory};
use wavepool::transport::{PubSocket, PullSocket, PushSocket};

struct Ports {
    lp: u16,
    hp: u16,
    cmd: u16,
    mon: u16,
    res: u16,
    ctrl: u16,
}

fn ports() -> Ports {
    Ports {
        lp: common::free_port(),
        hp: common::free_port(),
        cmd: common::free_port(),
        mon: common::free_port(),
        res: common::free_port(),
        ctrl: common::free_port(),
    }
}

fn config_json(name: &str, p: &Ports, with_ctrl: bool) -> String {
    let ctrl = if with_ctrl {
        format!("\"ctrl_socket\": \"{}\",", common::tcp_uri(p.ctrl))
    } else {
        String::new()
    };
    format!(
        r#"{{
            "{name}": {{
                "processing_type": "echo",
                "dataflow_type": "binary",
                "datasocket_type": "pushpull",
                "data_lp_socket": "{lp}",
                "data_hp_socket": "{hp}",
                "command_socket": "{cmd}",
                "monitoring_socket": "{mon}",
                {ctrl}
                "run_id": 7,
                "workers": [
                    {{
                        "name": "W1",
                        "worker_name": "w",
                        "num_workers": 1,
                        "result_socket_type": "pushpull",
                        "result_dataflow_type": "binary",
                        "result_lp_socket": "{res}",
                        "result_hp_socket": "none"
                    }}
                ]
            }}
        }}"#,
        name = name,
        lp = common::tcp_uri(p.lp),
        hp = common::tcp_uri(p.hp),
        cmd = common::tcp_uri(p.cmd),
        mon = common::tcp_uri(p.mon),
        ctrl = ctrl,
        res = common::tcp_uri(p.res),
    )
}

fn echo_factory() -> TransformFactory {
    Arc::new(|| Box::new(EchoTransform) as Box<dyn Transform>)
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let begin = Instant::now();
    while begin.elapsed() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    done()
}

fn wait_status(watch: &Arc<Mutex<Status>>, wanted: Status, deadline: Duration) -> bool {
    wait_until(deadline, || *watch.lock().unwrap() == wanted)
}

#[test]
fn binary_pipeline_end_to_end() {
    let p = ports();

    // The collaborators come up first: the frontend's control port, the
    // downstream result consumer, the monitoring collector, the commander.
    let ctrl_pull = PullSocket::bind(&common::tcp_uri(p.ctrl)).unwrap();
    let res_pull = PullSocket::bind(&common::tcp_uri(p.res)).unwrap();
    let mon_pull = PullSocket::bind(&common::tcp_uri(p.mon)).unwrap();
    let cmd_pub = PubSocket::bind(&common::tcp_uri(p.cmd)).unwrap();

    let cfg = ProcessConfig::from_str(&config_json("TEST1", &p, true), "TEST1").unwrap();
    let mut supervisor = Supervisor::new(cfg, echo_factory()).unwrap();
    let status = supervisor.status_watch();
    let runner = thread::spawn(move || supervisor.start());

    // The command subscription connects in the background.
    assert!(wait_until(Duration::from_secs(5), || cmd_pub.peer_count() >= 1));

    cmd_pub
        .send(&Envelope::command("start", "pytest", "all").to_bytes())
        .unwrap();

    // Scenario: `start` emits a DefaultA0 frame, then a StartAcq frame,
    // both zero-padded to 128 bytes and carrying the configured run id.
    let arm = ctrl_pull.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(arm.len(), 128);
    assert_eq!(arm[0], 0x8D);
    assert_eq!(&arm[HEADER_LEN..HEADER_LEN + 2], &[0xA0, 0x99]);
    assert_eq!(u16::from_le_bytes([arm[4], arm[5]]), 7);

    let start = ctrl_pull.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(start[0], 0x8D);
    assert_eq!(&start[HEADER_LEN..HEADER_LEN + 2], &[0xA0, 0x04]);
    assert_eq!(u16::from_le_bytes([start[4], start[5]]), 7);

    assert!(wait_status(&status, Status::Processing, Duration::from_secs(5)));

    // A well-formed waveform comes back byte-identical through the echo
    // transform.
    let mut data_push = PushSocket::connect(&common::tcp_uri(p.lp)).unwrap();
    let frame = common::waveform_frame(7, &common::spike_samples(100, 1100, 500));
    data_push.send(&frame).unwrap();
    let result = res_pull.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(result, frame);

    // A malformed message is dropped with the listener staying alive.
    data_push.send(&[1, 2, 3]).unwrap();
    assert!(res_pull.recv_timeout(Duration::from_millis(300)).is_err());
    data_push.send(&frame).unwrap();
    let result = res_pull.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(result, frame);

    // getstatus answers with a snapshot addressed to the requester.
    cmd_pub
        .send(&Envelope::command("getstatus", "pytest", "all").to_bytes())
        .unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    let snapshot = loop {
        assert!(Instant::now() < deadline, "no status snapshot arrived");
        let raw = match mon_pull.recv_timeout(Duration::from_secs(1)) {
            Ok(raw) => raw,
            Err(_) => continue,
        };
        let env: Envelope = serde_json::from_slice(&raw).unwrap();
        if env.header.pidtarget == "pytest" {
            break env;
        }
    };
    assert_eq!(snapshot.body["manager"], "W1");
    assert!(snapshot.body["workers"][0]["total"].as_u64().unwrap() >= 2);

    // Cleaned shutdown: drain, then terminate and send StopAcq upstream.
    cmd_pub
        .send(&Envelope::command("cleanedshutdown", "pytest", "all").to_bytes())
        .unwrap();
    assert!(wait_status(&status, Status::Shutdown, Duration::from_secs(15)));
    let stop = ctrl_pull.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(&stop[HEADER_LEN..HEADER_LEN + 2], &[0xA0, 0x05]);

    runner.join().unwrap();
}

struct SlowEcho;

impl Transform for SlowEcho {
    fn process(&mut self, data: &[u8], _priority: Priority) -> Vec<u8> {
        thread::sleep(Duration::from_millis(2));
        data.to_vec()
    }
}

#[test]
fn cleaned_shutdown_drains_the_backlog() {
    let p = ports();

    let res_pull = PullSocket::bind(&common::tcp_uri(p.res)).unwrap();
    let _mon_pull = PullSocket::bind(&common::tcp_uri(p.mon)).unwrap();
    let cmd_pub = PubSocket::bind(&common::tcp_uri(p.cmd)).unwrap();

    let cfg = ProcessConfig::from_str(&config_json("TEST2", &p, false), "TEST2").unwrap();
    let factory: TransformFactory = Arc::new(|| Box::new(SlowEcho) as Box<dyn Transform>);
    let mut supervisor = Supervisor::new(cfg, factory).unwrap();
    let status = supervisor.status_watch();
    let runner = thread::spawn(move || supervisor.start());

    assert!(wait_until(Duration::from_secs(5), || cmd_pub.peer_count() >= 1));
    cmd_pub
        .send(&Envelope::command("start", "pytest", "all").to_bytes())
        .unwrap();
    assert!(wait_status(&status, Status::Processing, Duration::from_secs(5)));

    let mut data_push = PushSocket::connect(&common::tcp_uri(p.lp)).unwrap();
    let frame = common::waveform_frame(1, &common::spike_samples(100, 900, 64));
    for _ in 0..50 {
        data_push.send(&frame).unwrap();
    }

    // Give the listener a moment to enqueue the burst, then ask for a
    // cleaned shutdown while most of it is still waiting in the queues.
    thread::sleep(Duration::from_millis(500));
    cmd_pub
        .send(&Envelope::command("cleanedshutdown", "pytest", "all").to_bytes())
        .unwrap();

    let mut received = 0;
    let deadline = Instant::now() + Duration::from_secs(30);
    while received < 50 && Instant::now() < deadline {
        if res_pull.recv_timeout(Duration::from_millis(500)).is_ok() {
            received += 1;
        }
    }
    assert_eq!(received, 50, "the drain lost results");
    // Exactly 50: nothing was duplicated or invented.
    assert!(res_pull.recv_timeout(Duration::from_millis(500)).is_err());

    assert!(wait_status(&status, Status::Shutdown, Duration::from_secs(15)));
    runner.join().unwrap();
}

#[test]
fn stopprocessing_is_idempotent_and_reset_clears() {
    let p = ports();

    let _res_pull = PullSocket::bind(&common::tcp_uri(p.res)).unwrap();
    let cmd_pub = PubSocket::bind(&common::tcp_uri(p.cmd)).unwrap();

    let cfg = ProcessConfig::from_str(&config_json("TEST3", &p, false), "TEST3").unwrap();
    let mut supervisor = Supervisor::new(cfg, echo_factory()).unwrap();
    let status = supervisor.status_watch();
    let runner = thread::spawn(move || supervisor.start());

    assert!(wait_until(Duration::from_secs(5), || cmd_pub.peer_count() >= 1));

    cmd_pub
        .send(&Envelope::command("startprocessing", "pytest", "all").to_bytes())
        .unwrap();
    assert!(wait_status(&status, Status::Processing, Duration::from_secs(5)));

    // Repeating a gate command does not change the outcome.
    for _ in 0..2 {
        cmd_pub
            .send(&Envelope::command("stopprocessing", "pytest", "all").to_bytes())
            .unwrap();
    }
    assert!(wait_status(&status, Status::Waiting, Duration::from_secs(5)));

    // Reset from Waiting lands back in Waiting with clean queues.
    cmd_pub
        .send(&Envelope::command("reset", "pytest", "all").to_bytes())
        .unwrap();
    thread::sleep(Duration::from_millis(500));
    assert_eq!(*status.lock().unwrap(), Status::Waiting);

    // Commands addressed to another process are ignored.
    cmd_pub
        .send(&Envelope::command("startprocessing", "pytest", "SOMEONE_ELSE").to_bytes())
        .unwrap();
    thread::sleep(Duration::from_millis(300));
    assert_eq!(*status.lock().unwrap(), Status::Waiting);

    cmd_pub
        .send(&Envelope::command("shutdown", "pytest", "all").to_bytes())
        .unwrap();
    assert!(wait_status(&status, Status::Shutdown, Duration::from_secs(10)));
    runner.join().unwrap();
}
