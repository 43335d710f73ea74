//! 二进制变体端到端测试
//!
//! 本地 UDP socket 扮演控制器。帧字节在这里手工拼装，独立于协议层的编码实现。

use davinci_sdk::prelude::*;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

const JOINTS: usize = 4;
const COMMAND_LEN: usize = 4 * JOINTS + 1;
const FEEDBACK_LEN: usize = 12 * JOINTS + 1;

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

fn free_udp_port() -> u16 {
    UdpSocket::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

struct FakeController {
    socket: UdpSocket,
    driver_addr: SocketAddr,
}

impl FakeController {
    fn recv_command(&self) -> Vec<u8> {
        let mut buf = [0u8; 64];
        let (n, _) = self.socket.recv_from(&mut buf).unwrap();
        buf[..n].to_vec()
    }

    fn send(&self, bytes: &[u8]) {
        self.socket.send_to(bytes, self.driver_addr).unwrap();
    }
}

fn feedback(
    positions: [f32; JOINTS],
    velocities: [f32; JOINTS],
    efforts: [f32; JOINTS],
    flags: u8,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(FEEDBACK_LEN);
    for block in [positions, velocities, efforts] {
        for value in block {
            out.extend_from_slice(&value.to_be_bytes());
        }
    }
    out.push(flags);
    out
}

fn setpoint(command: &[u8], joint: usize) -> f32 {
    let bytes: [u8; 4] = command[joint * 4..joint * 4 + 4].try_into().unwrap();
    f32::from_be_bytes(bytes)
}

fn connect() -> (Driver, FakeController) {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let local_port = free_udp_port();

    let table = BinaryTable {
        local_port: Some(local_port),
        ..Default::default()
    };
    let driver = DriverBuilder::new(socket.local_addr().unwrap())
        .name("p4")
        .binary(table)
        .build()
        .unwrap();
    driver.connect().unwrap();

    let controller = FakeController {
        socket,
        driver_addr: SocketAddr::from(([127, 0, 0, 1], local_port)),
    };
    (driver, controller)
}

#[test]
fn test_static_table_and_first_frame() {
    let (driver, controller) = connect();

    assert!(driver.connected());
    assert!(driver.initialized());
    assert_eq!(
        driver.joint_names(),
        vec!["p4_hand_roll", "p4_hand_pitch", "p4_instrument_slide", "p4_instrument_roll"]
    );
    assert_eq!(driver.motor_names(), driver.joint_names());
    assert_eq!(driver.accepts_setpoint(), vec![true; JOINTS]);

    // 连接后立即发送一帧完整命令
    let command = controller.recv_command();
    assert_eq!(command.len(), COMMAND_LEN);
    assert!((0..JOINTS).all(|j| setpoint(&command, j) == 0.0));
    assert_eq!(command[COMMAND_LEN - 1], 0b0000_1111);
}

#[test]
fn test_setpoints_and_enables_on_the_wire() {
    let (driver, controller) = connect();
    controller.recv_command();

    driver.set_setpoint(2, 1.25).unwrap();
    let command = controller.recv_command();
    assert_eq!(setpoint(&command, 2), 1.25);
    assert_eq!(setpoint(&command, 0), 0.0);
    assert_eq!(command[COMMAND_LEN - 1], 0b0000_1111);

    // 只有使能变化时也发送完整帧
    driver.set_motor_enabled(0, false).unwrap();
    let command = controller.recv_command();
    assert_eq!(command.len(), COMMAND_LEN);
    assert_eq!(setpoint(&command, 2), 1.25);
    assert_eq!(command[COMMAND_LEN - 1], 0b0000_1110);

    driver.enable_motor("p4_instrument_roll", false).unwrap();
    let command = controller.recv_command();
    assert_eq!(command[COMMAND_LEN - 1], 0b0000_0110);
}

#[test]
fn test_feedback_is_applied() {
    let (driver, controller) = connect();
    controller.recv_command();

    controller.send(&feedback(
        [0.5, -1.0, 2.0, 3.5],
        [0.25, 0.0, 0.0, -0.25],
        [1.0, 2.0, 4.0, 8.0],
        0b0000_0101,
    ));

    assert!(wait_until(Duration::from_secs(2), || driver.positions()[3] == 3.5));
    let snapshot = driver.snapshot();
    assert_eq!(snapshot.positions(), vec![0.5, -1.0, 2.0, 3.5]);
    assert_eq!(snapshot.velocities(), vec![0.25, 0.0, 0.0, -0.25]);
    assert_eq!(snapshot.efforts(), vec![1.0, 2.0, 4.0, 8.0]);
    assert_eq!(snapshot.motors_active(), vec![true, false, true, false]);
    assert!(driver.is_alive(Duration::from_secs(1)));
}

#[test]
fn test_wrong_length_frames_are_discarded() {
    let (driver, controller) = connect();
    controller.recv_command();

    controller.send(&[0u8; FEEDBACK_LEN - 1]);
    controller.send(&[0u8; FEEDBACK_LEN + 1]);
    assert!(wait_until(Duration::from_secs(2), || driver.metrics().rx_bad_messages >= 2));
    assert_eq!(driver.positions(), vec![0.0; JOINTS]);
    assert!(driver.time_since_last_feedback().is_none());
    assert!(driver.connected());
}

#[test]
fn test_silence_escalates_and_recovers() {
    let (driver, controller) = connect();
    controller.recv_command();

    assert!(wait_until(Duration::from_secs(2), || driver.link_health() == LinkHealth::Lost));
    assert!(driver.metrics().rx_timeouts >= 20);
    assert!(driver.connected());

    // 控制器恢复发送
    let frame = feedback([1.0; JOINTS], [0.0; JOINTS], [0.0; JOINTS], 0);
    assert!(wait_until(Duration::from_secs(2), || {
        controller.send(&frame);
        driver.link_health() == LinkHealth::Nominal
    }));
    assert_eq!(driver.positions(), vec![1.0; JOINTS]);
}

#[test]
fn test_shutdown_is_bounded() {
    let (driver, _controller) = connect();

    let start = Instant::now();
    driver.shutdown();
    assert!(start.elapsed() < Duration::from_millis(500), "took {:?}", start.elapsed());
    assert_eq!(driver.exit_reason(), Some(LoopExit::Stopped));
    assert!(!driver.connected());
    assert!(matches!(driver.connect(), Err(DriverError::Closed)));
}
