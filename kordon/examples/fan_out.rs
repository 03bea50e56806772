/// 事件总线示例：一个生产者、三个处理器
/// 展示并发扇出、批内顺序、处理器 panic 隔离以及 shutdown 时的最后一次投递
use anyhow::Result as AnyResult;
use kordon::{EventBus, EventBusConfig, Handler};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
enum OrderEvent {
    Placed { id: u32, amount: i64 },
    Shipped { id: u32 },
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kordon=debug")),
        )
        .init();

    let bus = EventBus::<OrderEvent>::with_config(EventBusConfig::builder().name("orders").build());

    // 审计：记录全部事件
    let audit = Arc::new(Mutex::new(Vec::new()));
    {
        let audit = audit.clone();
        bus.register(Handler::named("audit", move |ev: &OrderEvent| {
            audit.lock().unwrap().push(format!("{ev:?}"));
        }));
    }

    // 报表：慢处理器，不影响其他处理器
    let report = Handler::named("report", |ev: &OrderEvent| {
        if let OrderEvent::Placed { id, amount } = ev {
            std::thread::sleep(Duration::from_millis(50));
            println!("report: order {id} +{amount}");
        }
    });
    bus.register(report.clone());

    // 发货通知：遇到异常金额时 panic，只影响这一次调用
    bus.register(Handler::named("notify", |ev: &OrderEvent| match ev {
        OrderEvent::Placed { amount, .. } if *amount < 0 => panic!("negative amount {amount}"),
        OrderEvent::Shipped { id } => println!("notify: order {id} shipped"),
        _ => {}
    }));

    bus.raise(OrderEvent::Placed { id: 1, amount: 120 });
    bus.raise(OrderEvent::Placed { id: 2, amount: -5 });
    bus.raise(OrderEvent::Shipped { id: 1 });

    tokio::time::sleep(Duration::from_millis(200)).await;

    bus.unregister(&report);
    bus.raise(OrderEvent::Shipped { id: 2 });

    bus.shutdown();
    bus.join().await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    println!("\n--- audit ---");
    for line in audit.lock().unwrap().iter() {
        println!("{line}");
    }

    Ok(())
}
