//! 状态监视示例
//!
//! 连接配置文件中的全部控制器，周期性打印关节状态与链路健康度。
//!
//! # 使用说明
//!
//! ```bash
//! cargo run --example monitor -- davinci.toml
//! ```

use davinci_sdk::prelude::*;
use std::time::Duration;

fn main() -> anyhow::Result<()> {
    davinci_sdk::init_logging("monitor=info,davinci_driver=info")
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "davinci.toml".to_string());
    let config = RobotConfig::load(&path)?;
    println!("Loaded {} controllers from {}", config.controllers.len(), path);

    let robot = Davinci::from_config(&config)?;
    robot.connect(Duration::from_secs(10))?;

    let names = robot.joint_names()?;
    println!("Joints: {}", names.join(", "));
    println!("Motors: {}", robot.motor_names()?.join(", "));

    for _ in 0..20 {
        let states = robot.read()?;
        for (name, position) in names.iter().zip(&states.positions) {
            print!("{}={:.3} ", name, position);
        }
        println!();

        for driver in robot.drivers() {
            let metrics = driver.metrics();
            println!(
                "  {}: {:?}, rx={} bad={} timeouts={} tx={}",
                driver.name(),
                driver.link_health(),
                metrics.rx_messages,
                metrics.rx_bad_messages,
                metrics.rx_timeouts,
                metrics.tx_messages
            );
        }
        println!("  active motors: {:?}", robot.active_motors()?);

        std::thread::sleep(Duration::from_millis(500));
    }

    robot.shutdown();
    Ok(())
}
