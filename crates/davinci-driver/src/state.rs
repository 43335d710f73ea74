//! 共享机器人状态
//!
//! 客户端线程与 IO 线程共享同一个 [`RobotState`]，由单个互斥锁保护。
//! 锁不对外暴露：[`SharedState`] 只提供在锁内完成的复合操作
//! （快照读取、按索引写入、脏标志取出），调用者无法观察到“写了一半”的状态。
//!
//! 关节数据按记录（[`JointRecord`]）而不是按并行数组存放，
//! 因此名称、位置、速度、力矩、设定值与设定值掩码的长度在任何时刻都一致。

use crate::builder::BinaryTable;
use crate::error::DriverError;
use davinci_protocol::{FeedbackFrame, Handshake, Message, Telemetry};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

/// 单个关节的状态
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JointRecord {
    pub name: String,
    pub position: f64,
    pub velocity: f64,
    pub effort: f64,
    pub setpoint: f64,
    /// 是否接受设定值（握手后固定，置位后不会被清除）
    pub accepts_setpoint: bool,
}

impl JointRecord {
    fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// 单个电机的状态
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MotorRecord {
    pub name: String,
    /// 设备上报的激活状态
    pub active: bool,
    /// 驱动下发的使能状态
    pub enabled: bool,
}

/// 发送方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundMode {
    /// 只包含有新内容的部分（文本变体）
    Partial,
    /// 任一部分有新内容时发送完整帧（二进制变体）
    Full,
}

/// 从脏标志取出的待发送内容
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Outbound {
    pub header: String,
    /// `Partial` 模式下只包含接受设定值的关节
    pub setpoints: Option<Vec<f64>>,
    pub enables: Option<Vec<bool>>,
}

/// 机器人状态
#[derive(Debug, Clone, Default)]
pub struct RobotState {
    joints: Vec<JointRecord>,
    motors: Vec<MotorRecord>,
    root_header: String,
    initialized: bool,
    setpoints_dirty: bool,
    enables_dirty: bool,
}

impl RobotState {
    fn apply_handshake(&mut self, handshake: &Handshake) -> bool {
        if self.initialized {
            trace!("Ignoring handshake '{}': already initialized", handshake.header);
            return false;
        }

        self.joints = handshake.position.iter().map(JointRecord::named).collect();
        for name in &handshake.setpoints {
            match self.joints.iter_mut().find(|joint| &joint.name == name) {
                Some(joint) => joint.accepts_setpoint = true,
                None => warn!("Handshake lists setpoint for unknown joint '{}'", name),
            }
        }
        self.motors = handshake
            .motor_active
            .iter()
            .map(|name| MotorRecord {
                name: name.clone(),
                ..Default::default()
            })
            .collect();
        self.root_header = handshake.header.clone();
        self.initialized = true;

        debug!(
            "Handshake '{}': {} joints ({} with setpoints), {} motors",
            self.root_header,
            self.joints.len(),
            self.joints.iter().filter(|j| j.accepts_setpoint).count(),
            self.motors.len()
        );
        true
    }

    fn apply_telemetry(&mut self, telemetry: &Telemetry) -> bool {
        if !self.initialized || telemetry.member != self.root_header {
            trace!("Dropping telemetry '{}'", telemetry.member);
            return false;
        }

        // 较短的列表只更新前 N 个，较长的列表多出的部分被忽略
        if let Some(values) = &telemetry.position {
            for (joint, &value) in self.joints.iter_mut().zip(values) {
                joint.position = value;
            }
        }
        if let Some(values) = &telemetry.velocity {
            for (joint, &value) in self.joints.iter_mut().zip(values) {
                joint.velocity = value;
            }
        }
        if let Some(values) = &telemetry.effort {
            for (joint, &value) in self.joints.iter_mut().zip(values) {
                joint.effort = value;
            }
        }
        if let Some(values) = &telemetry.motor_active {
            for (motor, &value) in self.motors.iter_mut().zip(values) {
                motor.active = value;
            }
        }
        true
    }

    fn apply_feedback(&mut self, frame: &FeedbackFrame) -> bool {
        if !self.initialized {
            return false;
        }

        for (i, joint) in self.joints.iter_mut().enumerate() {
            if let Some(&value) = frame.positions.get(i) {
                joint.position = f64::from(value);
            }
            if let Some(&value) = frame.velocities.get(i) {
                joint.velocity = f64::from(value);
            }
            if let Some(&value) = frame.efforts.get(i) {
                joint.effort = f64::from(value);
            }
        }
        for (motor, &value) in self.motors.iter_mut().zip(&frame.active) {
            motor.active = value;
        }
        true
    }

    fn check_joint(&self, index: usize) -> Result<(), DriverError> {
        if !self.initialized {
            return Err(DriverError::NotInitialized);
        }
        if index >= self.joints.len() {
            return Err(DriverError::IndexOutOfRange {
                index,
                len: self.joints.len(),
            });
        }
        Ok(())
    }

    fn check_motor(&self, index: usize) -> Result<(), DriverError> {
        if !self.initialized {
            return Err(DriverError::NotInitialized);
        }
        if index >= self.motors.len() {
            return Err(DriverError::IndexOutOfRange {
                index,
                len: self.motors.len(),
            });
        }
        Ok(())
    }
}

/// 一次性读取的一致状态副本
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RobotSnapshot {
    pub joints: Vec<JointRecord>,
    pub motors: Vec<MotorRecord>,
    pub root_header: String,
    pub initialized: bool,
}

impl RobotSnapshot {
    pub fn joint_names(&self) -> Vec<String> {
        self.joints.iter().map(|j| j.name.clone()).collect()
    }

    pub fn positions(&self) -> Vec<f64> {
        self.joints.iter().map(|j| j.position).collect()
    }

    pub fn velocities(&self) -> Vec<f64> {
        self.joints.iter().map(|j| j.velocity).collect()
    }

    pub fn efforts(&self) -> Vec<f64> {
        self.joints.iter().map(|j| j.effort).collect()
    }

    pub fn setpoints(&self) -> Vec<f64> {
        self.joints.iter().map(|j| j.setpoint).collect()
    }

    pub fn accepts_setpoint(&self) -> Vec<bool> {
        self.joints.iter().map(|j| j.accepts_setpoint).collect()
    }

    pub fn motor_names(&self) -> Vec<String> {
        self.motors.iter().map(|m| m.name.clone()).collect()
    }

    pub fn motors_active(&self) -> Vec<bool> {
        self.motors.iter().map(|m| m.active).collect()
    }

    pub fn motors_enabled(&self) -> Vec<bool> {
        self.motors.iter().map(|m| m.enabled).collect()
    }
}

/// 线程安全的共享状态
#[derive(Debug, Default)]
pub struct SharedState {
    inner: Mutex<RobotState>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 应用一条解码后的文本消息，返回状态是否被修改
    pub fn apply_message(&self, message: &Message) -> bool {
        match message {
            Message::Handshake(handshake) => self.inner.lock().apply_handshake(handshake),
            Message::Telemetry(telemetry) => self.inner.lock().apply_telemetry(telemetry),
            Message::Empty => false,
        }
    }

    /// 应用一帧二进制反馈
    pub fn apply_feedback(&self, frame: &FeedbackFrame) -> bool {
        self.inner.lock().apply_feedback(frame)
    }

    /// 按静态表建立关节/电机（二进制变体在 connect 时调用）
    ///
    /// 已初始化时不做任何修改。两个脏标志都会被置位，以便第一帧立即发出。
    pub fn populate_static(&self, table: &BinaryTable) -> bool {
        let mut state = self.inner.lock();
        if state.initialized {
            return false;
        }

        state.joints = table
            .joint_names
            .iter()
            .map(|name| JointRecord {
                name: name.clone(),
                accepts_setpoint: true,
                ..Default::default()
            })
            .collect();
        state.motors = table
            .motors()
            .iter()
            .map(|name| MotorRecord {
                name: name.clone(),
                active: false,
                enabled: table.motors_enabled,
            })
            .collect();
        state.root_header.clear();
        state.initialized = true;
        state.setpoints_dirty = true;
        state.enables_dirty = true;
        true
    }

    /// 清空关节表与全部标志，回到握手前的状态
    pub fn clear(&self) {
        *self.inner.lock() = RobotState::default();
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lock().initialized
    }

    pub fn root_header(&self) -> String {
        self.inner.lock().root_header.clone()
    }

    pub fn joint_count(&self) -> usize {
        self.inner.lock().joints.len()
    }

    pub fn motor_count(&self) -> usize {
        self.inner.lock().motors.len()
    }

    /// 读取一致的状态快照
    pub fn snapshot(&self) -> RobotSnapshot {
        let state = self.inner.lock();
        RobotSnapshot {
            joints: state.joints.clone(),
            motors: state.motors.clone(),
            root_header: state.root_header.clone(),
            initialized: state.initialized,
        }
    }

    /// 在锁内对状态做只读投影
    pub fn read<R>(&self, f: impl FnOnce(&RobotState) -> R) -> R {
        f(&self.inner.lock())
    }

    /// 设置单个关节的设定值并标记 `setpoints_dirty`
    ///
    /// 不接受设定值的关节也会记录数值，但不会出现在发送的设定值列表中。
    pub fn set_setpoint(&self, index: usize, value: f64) -> Result<(), DriverError> {
        let mut state = self.inner.lock();
        state.check_joint(index)?;
        state.joints[index].setpoint = value;
        state.setpoints_dirty = true;
        Ok(())
    }

    /// 一次写入前 N 个关节的设定值
    pub fn set_setpoints(&self, values: &[f64]) -> Result<(), DriverError> {
        let mut state = self.inner.lock();
        if !state.initialized {
            return Err(DriverError::NotInitialized);
        }
        if values.len() > state.joints.len() {
            return Err(DriverError::IndexOutOfRange {
                index: values.len() - 1,
                len: state.joints.len(),
            });
        }
        for (joint, &value) in state.joints.iter_mut().zip(values) {
            joint.setpoint = value;
        }
        if !values.is_empty() {
            state.setpoints_dirty = true;
        }
        Ok(())
    }

    /// 设置单个电机的使能并标记 `enables_dirty`
    pub fn set_motor_enabled(&self, index: usize, enabled: bool) -> Result<(), DriverError> {
        let mut state = self.inner.lock();
        state.check_motor(index)?;
        state.motors[index].enabled = enabled;
        state.enables_dirty = true;
        Ok(())
    }

    /// 按名称设置电机使能
    pub fn enable_motor(&self, name: &str, enabled: bool) -> Result<(), DriverError> {
        let mut state = self.inner.lock();
        if !state.initialized {
            return Err(DriverError::NotInitialized);
        }
        let motor = state
            .motors
            .iter_mut()
            .find(|motor| motor.name == name)
            .ok_or_else(|| DriverError::UnknownMotor(name.to_string()))?;
        motor.enabled = enabled;
        state.enables_dirty = true;
        Ok(())
    }

    /// 取出待发送内容并清除对应的脏标志
    ///
    /// 没有任何脏标志时返回 `None`。
    pub fn drain_outbound(&self, mode: OutboundMode) -> Option<Outbound> {
        let mut state = self.inner.lock();
        if !state.setpoints_dirty && !state.enables_dirty {
            return None;
        }

        let (send_setpoints, send_enables) = match mode {
            OutboundMode::Partial => (state.setpoints_dirty, state.enables_dirty),
            OutboundMode::Full => (true, true),
        };

        let setpoints = match mode {
            OutboundMode::Partial => {
                let masked: Vec<f64> = state
                    .joints
                    .iter()
                    .filter(|joint| joint.accepts_setpoint)
                    .map(|joint| joint.setpoint)
                    .collect();
                // 空列表不发送
                (send_setpoints && !masked.is_empty()).then_some(masked)
            },
            OutboundMode::Full => {
                send_setpoints.then(|| state.joints.iter().map(|joint| joint.setpoint).collect())
            },
        };
        let enables = match mode {
            OutboundMode::Partial => send_enables && !state.motors.is_empty(),
            OutboundMode::Full => send_enables,
        }
        .then(|| state.motors.iter().map(|motor| motor.enabled).collect());

        state.setpoints_dirty = false;
        state.enables_dirty = false;

        if setpoints.is_none() && enables.is_none() {
            trace!("Nothing to send for dirty members");
            return None;
        }

        Some(Outbound {
            header: state.root_header.clone(),
            setpoints,
            enables,
        })
    }

    /// 发送失败后重新标记已取出的部分
    ///
    /// 不恢复旧数值：下一次 [`SharedState::drain_outbound`] 取出的是当前的最新值。
    pub fn requeue_outbound(&self, outbound: &Outbound) {
        let mut state = self.inner.lock();
        state.setpoints_dirty |= outbound.setpoints.is_some();
        state.enables_dirty |= outbound.enables.is_some();
    }
}

impl RobotState {
    pub fn joints(&self) -> &[JointRecord] {
        &self.joints
    }

    pub fn motors(&self) -> &[MotorRecord] {
        &self.motors
    }

    pub fn initialized(&self) -> bool {
        self.initialized
    }

    pub fn setpoints_dirty(&self) -> bool {
        self.setpoints_dirty
    }

    pub fn enables_dirty(&self) -> bool {
        self.enables_dirty
    }
}
