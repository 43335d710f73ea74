//! 文本变体端到端测试
//!
//! 本地 TCP 监听者扮演控制器：发送握手与遥测，接收命令。

use davinci_sdk::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};

const HANDSHAKE: &str = concat!(
    r#"{"psm1_names":{"position":["outer_yaw","outer_pitch","insertion"],"#,
    r#""setpoints":["outer_yaw","insertion"],"motoractive":["yaw_motor","pitch_motor"]}}"#,
    "\r\n"
);

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// 建立驱动与假控制器之间的连接
fn connect() -> (Driver, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let driver = DriverBuilder::new(listener.local_addr().unwrap())
        .name("psm1")
        .build()
        .unwrap();

    driver.connect().unwrap();
    let (device, _) = listener.accept().unwrap();
    device
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    (driver, device)
}

/// 按随机大小分块写入，覆盖任意拆分的 TCP 段
fn write_chunked(device: &mut TcpStream, bytes: &[u8], rng: &mut StdRng) {
    let mut rest = bytes;
    while !rest.is_empty() {
        let n = rng.gen_range(1..=rest.len().min(7));
        device.write_all(&rest[..n]).unwrap();
        device.flush().unwrap();
        rest = &rest[n..];
        std::thread::sleep(Duration::from_micros(200));
    }
}

fn read_command(reader: &mut BufReader<TcpStream>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    assert!(line.ends_with("\r\n"), "missing terminator: {:?}", line);
    serde_json::from_str(line.trim_end()).unwrap()
}

#[test]
fn test_handshake_telemetry_and_commands() {
    let (driver, mut device) = connect();
    let mut rng = StdRng::seed_from_u64(7);

    assert!(driver.connected());
    assert!(!driver.initialized());
    assert!(matches!(driver.set_setpoint(0, 1.0), Err(DriverError::NotInitialized)));

    write_chunked(&mut device, HANDSHAKE.as_bytes(), &mut rng);
    driver.wait_for_initialized(Duration::from_secs(2)).unwrap();

    assert_eq!(driver.root_header(), "psm1");
    assert_eq!(driver.joint_names(), vec!["outer_yaw", "outer_pitch", "insertion"]);
    assert_eq!(driver.accepts_setpoint(), vec![true, false, true]);
    assert_eq!(driver.motor_names(), vec!["yaw_motor", "pitch_motor"]);
    assert_eq!(driver.motors_enabled(), vec![false, false]);

    // 一次写入的多条消息，以及被忽略的第二次握手
    let telemetry = [
        concat!(r#"{"psm1":{"position":[0.1,0.2,0.3],"velocity":[1.0,2.0,3.0]}}"#, "\r\n").to_string(),
        HANDSHAKE.replace("outer_yaw", "renamed"),
        concat!(r#"{"psm1":{"effort":[5.0],"motoractive":[true,false]}}"#, "\r\n").to_string(),
    ]
    .concat();
    write_chunked(&mut device, telemetry.as_bytes(), &mut rng);

    assert!(wait_until(Duration::from_secs(2), || driver.efforts()[0] == 5.0));
    let snapshot = driver.snapshot();
    assert_eq!(snapshot.positions(), vec![0.1, 0.2, 0.3]);
    assert_eq!(snapshot.velocities(), vec![1.0, 2.0, 3.0]);
    assert_eq!(snapshot.efforts(), vec![5.0, 0.0, 0.0]);
    assert_eq!(snapshot.motors_active(), vec![true, false]);
    assert_eq!(snapshot.joint_names()[0], "outer_yaw");
    assert!(driver.is_alive(Duration::from_secs(1)));

    // 只发送接受设定值的关节
    let mut reader = BufReader::new(device.try_clone().unwrap());
    driver.set_setpoints(&[1.5, 9.9, -2.5]).unwrap();
    let command = read_command(&mut reader);
    assert_eq!(command, serde_json::json!({"psm1": {"setpoints": [1.5, -2.5]}}));

    driver.enable_motor("pitch_motor", true).unwrap();
    let command = read_command(&mut reader);
    assert_eq!(command, serde_json::json!({"psm1": {"enablemotor": [false, true]}}));

    assert!(matches!(
        driver.enable_motor("missing", true),
        Err(DriverError::UnknownMotor(_))
    ));
    assert!(matches!(
        driver.set_setpoint(3, 0.0),
        Err(DriverError::IndexOutOfRange { index: 3, len: 3 })
    ));

    assert!(driver.metrics().rx_messages >= 3);
    assert!(wait_until(Duration::from_secs(2), || driver.metrics().tx_messages == 2));
}

#[test]
fn test_stalled_controller_receives_only_whole_commands() {
    let (driver, mut device) = connect();

    let names: Vec<String> = (0..20000).map(|i| format!("joint_{}", i)).collect();
    let handshake = serde_json::json!({
        "psm1_names": {"position": names, "setpoints": names, "motoractive": []}
    });
    device
        .write_all(format!("{}\r\n", handshake).as_bytes())
        .unwrap();
    driver.wait_for_initialized(Duration::from_secs(5)).unwrap();

    // 控制器不读取，直到两端的 socket 缓冲区都被写满
    let start = Instant::now();
    let mut value = 0.0;
    while start.elapsed() < Duration::from_millis(1500) {
        value += 1.0;
        driver.set_setpoints(&vec![value; names.len()]).unwrap();
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(driver.metrics().tx_messages > 0);

    let mut reader = BufReader::new(device.try_clone().unwrap());
    loop {
        let command = read_command(&mut reader);
        let setpoints = command["psm1"]["setpoints"].as_array().unwrap();
        assert_eq!(setpoints.len(), names.len());
        if setpoints.iter().all(|v| v.as_f64() == Some(value)) {
            break;
        }
    }
    assert!(driver.connected());
}

#[test]
fn test_garbage_is_discarded_and_stream_recovers() {
    let (driver, mut device) = connect();
    device.write_all(HANDSHAKE.as_bytes()).unwrap();
    driver.wait_for_initialized(Duration::from_secs(2)).unwrap();

    device.write_all(b"{\"psm1\": not json}\r\n").unwrap();
    assert!(wait_until(Duration::from_secs(2), || driver.metrics().rx_bad_messages > 0));

    device
        .write_all(b"{\"psm1\":{\"position\":[4.0,5.0,6.0]}}\r\n")
        .unwrap();
    assert!(wait_until(Duration::from_secs(2), || driver.positions() == vec![4.0, 5.0, 6.0]));
    assert!(driver.connected());
}

#[test]
fn test_peer_close_is_terminal() {
    let (driver, device) = connect();
    drop(device);

    assert!(wait_until(Duration::from_secs(2), || driver.exit_reason().is_some()));
    assert_eq!(driver.exit_reason(), Some(LoopExit::PeerClosed));
    assert_eq!(driver.link_state(), LinkState::Closed);
    assert!(!driver.connected());
    assert!(matches!(driver.connect(), Err(DriverError::Closed)));
}

#[test]
fn test_shutdown_with_silent_peer_is_bounded() {
    let (driver, _device) = connect();

    let start = Instant::now();
    driver.shutdown();
    assert!(start.elapsed() < Duration::from_millis(500), "took {:?}", start.elapsed());
    assert_eq!(driver.exit_reason(), Some(LoopExit::Stopped));
}

#[test]
fn test_connect_refused_is_recoverable() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let driver = DriverBuilder::new(addr).build().unwrap();
    assert!(driver.connect().is_err());
    assert_eq!(driver.link_state(), LinkState::Disconnected);

    // 控制器上线后重试成功
    let listener = TcpListener::bind(addr).unwrap();
    driver.connect().unwrap();
    let _device = listener.accept().unwrap();
    assert!(driver.connected());
}
