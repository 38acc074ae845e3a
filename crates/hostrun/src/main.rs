//! Standalone agent binary.
//!
//! With no host runtime linked in, the agent serves a small in-memory heap so
//! clients can be developed against it.
//!
//! ```bash
//! hostrun --port 32900 --log-command "logcat" --clear-command "logcat -c"
//! ```

use std::sync::Arc;

use clap::Parser;
use hostreflect::HostValue;
use hostreflect::PrimitiveKind;
use hostreflect::TypeHandle;
use hostreflect::mock::MockRuntime;
use hostrun::Agent;
use hostrun::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    info!("hostrun v{}", env!("CARGO_PKG_VERSION"));

    let mut agent = Agent::new(config, Arc::new(demo_runtime()));
    let addr = agent.start().await?;
    info!("control endpoint: ws://{}/", addr);

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    agent.stop().await?;
    Ok(())
}

fn demo_runtime() -> MockRuntime {
    let int = TypeHandle::Primitive(PrimitiveKind::Int);
    let double = TypeHandle::Primitive(PrimitiveKind::Double);
    let string = TypeHandle::class("java.lang.String");

    let runtime = MockRuntime::with_core_classes();
    let ints = runtime.new_array(int.clone(), (1..=5).map(HostValue::Int).collect());
    let boxed = [1.5, 2.5, 4.0].map(|v| HostValue::Object(runtime.new_boxed(HostValue::Double(v))));
    let doubles = runtime.new_list("java.util.ArrayList", boxed.to_vec());
    let labels = ["alpha", "beta"].map(|s| HostValue::Object(runtime.new_string(s)));
    let labels = runtime.new_array(string.clone(), labels.to_vec());

    runtime
        .define_class("demo.Sample")
        .static_field("intArray", TypeHandle::array_of(int.clone(), 1), HostValue::Object(ints))
        .static_field("doubleList", TypeHandle::class("java.util.List"), HostValue::Object(doubles))
        .static_field("stringArray", TypeHandle::array_of(string.clone(), 1), HostValue::Object(labels))
        .static_field("ratio", double, HostValue::Double(0.75))
        .field("count", int.clone())
        .field("label", string.clone())
        .method("resize", vec![int.clone(), int], TypeHandle::Void)
        .method("rename", vec![string], TypeHandle::Void)
        .build();
    runtime.add_thread("hostrun-agent", true, "at hostrun.Agent.serve(Agent.rs)");
    runtime
}
