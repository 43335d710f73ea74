//! 多控制器整机接口
//!
//! 关节与电机按控制器顺序拼接；[`Davinci::read`] 与 [`Davinci::write`] 按各控制器的关节数拆分。

use crate::config::RobotConfig;
use crate::error::ClientError;
use davinci_driver::{Driver, DriverBuilder, DriverError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// `connect` 的轮询间隔
const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 整机关节状态（按控制器顺序拼接）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JointStates {
    pub positions: Vec<f64>,
    pub velocities: Vec<f64>,
    pub efforts: Vec<f64>,
}

/// Davinci 机器人
///
/// # Example
///
/// ```no_run
/// use davinci_client::{Davinci, RobotConfig};
/// use std::time::Duration;
///
/// let config = RobotConfig::load("davinci.toml")?;
/// let robot = Davinci::from_config(&config)?;
/// robot.connect(Duration::from_secs(10))?;
///
/// let states = robot.read()?;
/// robot.write(&states.positions)?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct Davinci {
    drivers: Vec<Driver>,
}

impl Davinci {
    pub fn new(drivers: Vec<Driver>) -> Self {
        Self { drivers }
    }

    /// 为每个控制器构建一个驱动（不连接）
    pub fn from_config(config: &RobotConfig) -> Result<Self, ClientError> {
        config.validate()?;

        let drivers = config
            .controllers
            .iter()
            .enumerate()
            .map(|(i, controller)| {
                let name = controller
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("controller{}", i));
                Ok(DriverBuilder::new(controller.endpoint()?)
                    .name(name)
                    .variant(controller.variant())
                    .pipeline_config(config.pipeline)
                    .build()?)
            })
            .collect::<Result<Vec<_>, ClientError>>()?;

        Ok(Self::new(drivers))
    }

    pub fn drivers(&self) -> &[Driver] {
        &self.drivers
    }

    /// 连接全部控制器并等待初始化
    ///
    /// 未连接的控制器每 100 ms 重试一次。
    ///
    /// # 错误
    /// - `ClientError::Timeout`: 截止时间内未能全部连接并初始化
    /// - `ClientError::Driver(DriverError::Closed)`: 某个控制器的链路已终止
    pub fn connect(&self, timeout: Duration) -> Result<(), ClientError> {
        let start = Instant::now();
        info!("Connecting to {} controllers", self.drivers.len());

        loop {
            let mut all_connected = true;
            for driver in &self.drivers {
                if !driver.connected() {
                    match driver.connect() {
                        Ok(()) => {},
                        Err(DriverError::Closed) => return Err(DriverError::Closed.into()),
                        Err(e) => debug!("{}: {}", driver.name(), e),
                    }
                }
                all_connected &= driver.connected();
            }

            if all_connected && self.initialized() {
                info!("All controllers connected and initialized");
                return Ok(());
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(ClientError::Timeout);
            }
            std::thread::sleep(CONNECT_POLL_INTERVAL.min(timeout - elapsed));
        }
    }

    /// 全部控制器都已初始化
    pub fn initialized(&self) -> bool {
        self.drivers.iter().all(Driver::initialized)
    }

    pub fn joint_names(&self) -> Result<Vec<String>, ClientError> {
        self.ensure_initialized()?;
        Ok(self.drivers.iter().flat_map(Driver::joint_names).collect())
    }

    /// `enable_motor` 接受的电机名
    pub fn motor_names(&self) -> Result<Vec<String>, ClientError> {
        self.ensure_initialized()?;
        Ok(self.drivers.iter().flat_map(Driver::motor_names).collect())
    }

    /// 当前处于激活状态的电机名
    pub fn active_motors(&self) -> Result<Vec<String>, ClientError> {
        self.ensure_initialized()?;
        Ok(self
            .drivers
            .iter()
            .flat_map(|driver| {
                let snapshot = driver.snapshot();
                snapshot
                    .motors
                    .into_iter()
                    .filter(|motor| motor.active)
                    .map(|motor| motor.name)
            })
            .collect())
    }

    /// 与 [`motor_names`](Self::motor_names) 对齐的激活标志
    pub fn active_motors_vector(&self) -> Result<Vec<bool>, ClientError> {
        self.ensure_initialized()?;
        Ok(self.drivers.iter().flat_map(Driver::motors_active).collect())
    }

    pub fn enabled_motors(&self) -> Result<Vec<String>, ClientError> {
        self.ensure_initialized()?;
        Ok(self
            .drivers
            .iter()
            .flat_map(|driver| {
                let snapshot = driver.snapshot();
                snapshot
                    .motors
                    .into_iter()
                    .filter(|motor| motor.enabled)
                    .map(|motor| motor.name)
            })
            .collect())
    }

    /// 按名称使能/失能电机（所有拥有该名称的控制器）
    ///
    /// # 错误
    /// - `ClientError::UnknownMotor`: 没有控制器拥有该电机
    pub fn enable_motor(&self, name: &str, enable: bool) -> Result<(), ClientError> {
        self.ensure_initialized()?;

        let mut found = false;
        for driver in &self.drivers {
            if driver.motor_names().iter().any(|motor| motor == name) {
                driver.enable_motor(name, enable)?;
                found = true;
            }
        }

        if !found {
            return Err(ClientError::UnknownMotor(name.to_string()));
        }
        info!("Motor {} {}", name, if enable { "enabled" } else { "disabled" });
        Ok(())
    }

    /// 读取整机关节状态（每个控制器一次一致性快照）
    pub fn read(&self) -> Result<JointStates, ClientError> {
        self.ensure_initialized()?;

        let mut states = JointStates::default();
        for driver in &self.drivers {
            let snapshot = driver.snapshot();
            states.positions.extend(snapshot.positions());
            states.velocities.extend(snapshot.velocities());
            states.efforts.extend(snapshot.efforts());
        }
        Ok(states)
    }

    /// 写入整机设定值，按各控制器的关节数拆分
    ///
    /// # 错误
    /// - `ClientError::LengthMismatch`: 长度与关节总数不符（不写入任何控制器）
    pub fn write(&self, setpoints: &[f64]) -> Result<(), ClientError> {
        self.ensure_initialized()?;

        let counts: Vec<usize> = self.drivers.iter().map(|d| d.joint_names().len()).collect();
        let expected: usize = counts.iter().sum();
        if setpoints.len() != expected {
            return Err(ClientError::LengthMismatch {
                expected,
                actual: setpoints.len(),
            });
        }

        let mut rest = setpoints;
        for (driver, count) in self.drivers.iter().zip(counts) {
            let (head, tail) = rest.split_at(count);
            driver.set_setpoints(head)?;
            rest = tail;
        }
        Ok(())
    }

    /// 关闭全部驱动
    pub fn shutdown(&self) {
        for driver in &self.drivers {
            driver.shutdown();
        }
    }

    fn ensure_initialized(&self) -> Result<(), ClientError> {
        if self.initialized() {
            Ok(())
        } else {
            Err(ClientError::NotInitialized)
        }
    }
}
