//! Driver 门面：连接生命周期、状态读写与关闭

use crate::builder::{DriverBuilder, Variant};
use crate::context::DriverContext;
use crate::error::DriverError;
use crate::lifecycle::LinkState;
use crate::link::{BinaryLink, Link, TextLink};
use crate::metrics::{LinkHealth, MetricsSnapshot};
use crate::pipeline::{LoopExit, PipelineConfig, io_loop};
use crate::state::RobotSnapshot;
use davinci_transport::{Interrupter, TcpTransport, UdpTransport};
use parking_lot::Mutex;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::io;
use std::thread::{self, JoinHandle, spawn};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// `wait_for_initialized` 的轮询间隔
const INIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Extension trait for timeout-capable thread joins
trait JoinTimeout<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<T>;
}

impl<T: Send + 'static> JoinTimeout<T> for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<T> {
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();

        // 看门狗线程负责 join，超时后它继续运行直到目标线程结束
        spawn(move || {
            let _ = tx.send(self.join());
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

/// IO 线程的入口
type IoBody = Box<dyn FnOnce() -> LoopExit + Send + 'static>;

/// 运行中的 IO 线程
struct IoThread {
    handle: JoinHandle<LoopExit>,
    interrupter: Interrupter,
}

/// 单个控制器的驱动
///
/// 持有一个后台 IO 线程和与之共享的状态。所有方法都可以从任意线程调用。
///
/// # Example
///
/// ```no_run
/// use davinci_driver::DriverBuilder;
/// use std::time::Duration;
///
/// let driver = DriverBuilder::new("192.168.0.10:8080".parse().unwrap())
///     .name("psm1")
///     .build()
///     .unwrap();
///
/// driver.connect().unwrap();
/// driver.wait_for_initialized(Duration::from_secs(2)).unwrap();
///
/// println!("{:?}", driver.positions());
/// driver.set_setpoint(0, 0.5).unwrap();
/// ```
pub struct Driver {
    name: String,
    endpoint: SocketAddr,
    variant: Variant,
    config: PipelineConfig,
    ctx: Arc<DriverContext>,
    /// 运行标志（IO 线程在每次迭代开始时检查）
    is_running: Arc<AtomicBool>,
    io: Mutex<Option<IoThread>>,
}

impl Driver {
    pub fn builder(endpoint: SocketAddr) -> DriverBuilder {
        DriverBuilder::new(endpoint)
    }

    pub(crate) fn new(
        name: String,
        endpoint: SocketAddr,
        variant: Variant,
        config: PipelineConfig,
    ) -> Self {
        Self {
            name,
            endpoint,
            variant,
            config,
            ctx: Arc::new(DriverContext::new()),
            is_running: Arc::new(AtomicBool::new(true)),
            io: Mutex::new(None),
        }
    }

    /// 建立传输并启动 IO 线程
    ///
    /// 已连接时直接返回 `Ok`。失败时状态回到 `Disconnected`，可以重试。
    ///
    /// # 错误
    /// - `DriverError::Closed`: 驱动已关闭或链路已终止
    /// - `DriverError::Transport`: 连接/绑定失败
    /// - `DriverError::IoThread`: 无法创建 IO 线程
    pub fn connect(&self) -> Result<(), DriverError> {
        let mut io = self.io.lock();
        match self.ctx.link_state.get() {
            LinkState::Connected => return Ok(()),
            LinkState::Closed => return Err(DriverError::Closed),
            LinkState::Disconnected | LinkState::Connecting => {},
        }

        self.ctx.link_state.set(LinkState::Connecting);
        info!(
            "{}: connecting to {} ({})",
            self.name,
            self.endpoint,
            self.variant.name()
        );

        let result = match &self.variant {
            Variant::Text => TcpTransport::connect(self.endpoint, self.config.connect_timeout())
                .map_err(DriverError::from)
                .and_then(|transport| {
                    let transport = transport.with_send_timeout(self.config.send_timeout());
                    self.start(&mut io, TextLink::new(transport))
                }),
            Variant::Binary(table) => {
                let local = SocketAddr::new(
                    Ipv4Addr::UNSPECIFIED.into(),
                    table.local_port.unwrap_or(self.endpoint.port()),
                );
                UdpTransport::bind(local, self.endpoint)
                    .map_err(DriverError::from)
                    .and_then(|transport| {
                        let transport = transport.with_send_timeout(self.config.send_timeout());
                        BinaryLink::new(transport, table.clone(), &self.config)
                    })
                    .and_then(|link| self.start(&mut io, link))
            },
        };

        if let Err(e) = &result {
            self.ctx.link_state.set(LinkState::Disconnected);
            warn!("{}: connect failed: {}", self.name, e);
        }
        result
    }

    /// 使用调用方提供的链路启动 IO 线程（测试与自定义传输）
    pub fn connect_with(&self, link: impl Link) -> Result<(), DriverError> {
        let mut io = self.io.lock();
        match self.ctx.link_state.get() {
            LinkState::Connected => return Ok(()),
            LinkState::Closed => return Err(DriverError::Closed),
            LinkState::Disconnected | LinkState::Connecting => {},
        }

        let result = self.start(&mut io, link);
        if result.is_err() {
            self.ctx.link_state.set(LinkState::Disconnected);
        }
        result
    }

    fn start(&self, io: &mut Option<IoThread>, link: impl Link) -> Result<(), DriverError> {
        self.start_with(io, link, |builder, body| builder.spawn(body))
    }

    /// `spawn` 失败时撤销 `on_connect` 写入的状态
    fn start_with<L, S>(
        &self,
        io: &mut Option<IoThread>,
        mut link: L,
        spawner: S,
    ) -> Result<(), DriverError>
    where
        L: Link,
        S: FnOnce(thread::Builder, IoBody) -> io::Result<JoinHandle<LoopExit>>,
    {
        link.on_connect(&self.ctx);
        let interrupter = link.interrupter();
        let variant = link.variant();

        // 先置 Connected，IO 线程退出时写入的 Closed 不会被覆盖
        self.ctx.link_state.set(LinkState::Connected);

        let ctx = self.ctx.clone();
        let is_running = self.is_running.clone();
        let config = self.config;
        let builder = thread::Builder::new().name(format!("davinci-io-{}", self.name));
        let body: IoBody = Box::new(move || io_loop(link, ctx, is_running, config));
        let handle = match spawner(builder, body) {
            Ok(handle) => handle,
            Err(e) => {
                self.ctx.state.clear();
                self.ctx.link_state.set(LinkState::Disconnected);
                return Err(DriverError::IoThread(e.to_string()));
            },
        };

        *io = Some(IoThread {
            handle,
            interrupter,
        });
        info!("{}: connected ({})", self.name, variant);
        Ok(())
    }

    /// 停止 IO 线程并关闭链路（幂等）
    pub fn shutdown(&self) {
        let mut io = self.io.lock();

        // Release: 与 IO 循环中的 Acquire 配对
        self.is_running.store(false, Ordering::Release);

        if let Some(thread) = io.take() {
            thread.interrupter.interrupt();
            match thread.handle.join_timeout(self.config.join_timeout()) {
                Ok(exit) => info!("{}: IO thread exited ({})", self.name, exit),
                Err(_) => error!(
                    "{}: IO thread panicked or failed to shut down within {:?}",
                    self.name,
                    self.config.join_timeout()
                ),
            }
        }

        self.ctx.link_state.set(LinkState::Closed);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn variant(&self) -> &Variant {
        &self.variant
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn link_state(&self) -> LinkState {
        self.ctx.link_state.get()
    }

    pub fn connected(&self) -> bool {
        self.ctx.link_state.get().is_connected()
    }

    /// 关节表是否已建立（文本变体：收到握手；二进制变体：连接时）
    pub fn initialized(&self) -> bool {
        self.ctx.state.is_initialized()
    }

    /// IO 线程的退出原因（线程运行中或从未启动时为 `None`）
    pub fn exit_reason(&self) -> Option<LoopExit> {
        self.ctx.exit_reason.load_full().map(|exit| (*exit).clone())
    }

    /// 阻塞直到关节表建立
    ///
    /// # 错误
    /// - `DriverError::Closed`: 等待期间链路终止
    /// - `DriverError::Timeout`: 超时
    pub fn wait_for_initialized(&self, timeout: Duration) -> Result<(), DriverError> {
        let start = Instant::now();
        loop {
            if self.initialized() {
                return Ok(());
            }
            if self.ctx.link_state.get().is_closed() {
                return Err(DriverError::Closed);
            }
            if start.elapsed() >= timeout {
                return Err(DriverError::Timeout);
            }
            std::thread::sleep(INIT_POLL_INTERVAL);
        }
    }

    /// 一致性快照（所有数组来自同一次加锁）
    pub fn snapshot(&self) -> RobotSnapshot {
        self.ctx.state.snapshot()
    }

    pub fn root_header(&self) -> String {
        self.ctx.state.root_header()
    }

    pub fn joint_names(&self) -> Vec<String> {
        self.ctx
            .state
            .read(|s| s.joints().iter().map(|j| j.name.clone()).collect())
    }

    pub fn motor_names(&self) -> Vec<String> {
        self.ctx
            .state
            .read(|s| s.motors().iter().map(|m| m.name.clone()).collect())
    }

    pub fn positions(&self) -> Vec<f64> {
        self.ctx.state.read(|s| s.joints().iter().map(|j| j.position).collect())
    }

    pub fn velocities(&self) -> Vec<f64> {
        self.ctx.state.read(|s| s.joints().iter().map(|j| j.velocity).collect())
    }

    pub fn efforts(&self) -> Vec<f64> {
        self.ctx.state.read(|s| s.joints().iter().map(|j| j.effort).collect())
    }

    pub fn setpoints(&self) -> Vec<f64> {
        self.ctx.state.read(|s| s.joints().iter().map(|j| j.setpoint).collect())
    }

    pub fn accepts_setpoint(&self) -> Vec<bool> {
        self.ctx
            .state
            .read(|s| s.joints().iter().map(|j| j.accepts_setpoint).collect())
    }

    pub fn motors_active(&self) -> Vec<bool> {
        self.ctx.state.read(|s| s.motors().iter().map(|m| m.active).collect())
    }

    pub fn motors_enabled(&self) -> Vec<bool> {
        self.ctx.state.read(|s| s.motors().iter().map(|m| m.enabled).collect())
    }

    /// 写入单个关节的设定值，下一次迭代发送
    ///
    /// # 错误
    /// - `DriverError::NotInitialized`: 关节表尚未建立
    /// - `DriverError::IndexOutOfRange`: 索引越界
    pub fn set_setpoint(&self, index: usize, value: f64) -> Result<(), DriverError> {
        self.ctx.state.set_setpoint(index, value)
    }

    /// 写入前 `values.len()` 个关节的设定值（一次加锁）
    pub fn set_setpoints(&self, values: &[f64]) -> Result<(), DriverError> {
        self.ctx.state.set_setpoints(values)
    }

    pub fn set_motor_enabled(&self, index: usize, enabled: bool) -> Result<(), DriverError> {
        self.ctx.state.set_motor_enabled(index, enabled)
    }

    /// 按名称使能/失能电机
    ///
    /// # 错误
    /// - `DriverError::UnknownMotor`: 没有该名称的电机
    pub fn enable_motor(&self, name: &str, enabled: bool) -> Result<(), DriverError> {
        self.ctx.state.enable_motor(name, enabled)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    pub fn link_health(&self) -> LinkHealth {
        LinkHealth::from_failures(
            self.ctx.metrics.snapshot().consecutive_failures,
            self.config.low_failure_threshold,
            self.config.high_failure_threshold,
        )
    }

    pub fn time_since_last_feedback(&self) -> Option<Duration> {
        self.ctx.feedback.time_since_last_feedback()
    }

    /// `timeout` 内是否收到过反馈
    pub fn is_alive(&self, timeout: Duration) -> bool {
        self.ctx.feedback.is_alive(timeout)
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("variant", &self.variant.name())
            .field("link_state", &self.ctx.link_state.get())
            .field("initialized", &self.initialized())
            .finish()
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.shutdown();
    }
}
