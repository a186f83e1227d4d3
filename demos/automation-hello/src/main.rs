//! Automation Hello Client
//!
//! Drives the hosted greeter through a typed wrapper, listens for its
//! events, and lists the running object table.
//!
//! Run with: cargo run --bin hello-automation -- --name Ada --times 3

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use automation_hello::{greeter_events, register, IGreeter, GREETER_CLSID};
use oleauto::loopback::LoopbackRuntime;
use oleauto::{ComInterface, DynamicProxy, EventHandlers, FactoryConfig, ObjectFactory};

#[derive(Parser)]
#[command(name = "hello-automation")]
#[command(about = "Automation Hello Client")]
struct Args {
    /// Name to greet
    #[arg(short, long, default_value = "World")]
    name: String,

    /// Greeting word used instead of "Hello"
    #[arg(short, long)]
    greeting: Option<String>,

    /// How many times to greet
    #[arg(short, long, default_value = "1")]
    times: u32,

    /// Seconds to wait for the apartment on shutdown
    #[arg(long, default_value = "5")]
    shutdown_timeout: u64,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Set up logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let runtime = Arc::new(LoopbackRuntime::new());
    register(&runtime);
    let config = FactoryConfig {
        apartment_name: "hello-apartment".to_string(),
        terminate_timeout: Duration::from_secs(args.shutdown_timeout),
        ..FactoryConfig::default()
    };
    let factory = ObjectFactory::with_config(runtime.clone(), config);

    // Calls block until the apartment answers, so keep them off the reactor
    let worker = factory.clone();
    let published = runtime.clone();
    let instance = tokio::task::spawn_blocking(move || -> oleauto::Result<IGreeter> {
        run_greeter(&worker, &args)?;
        publish(&worker, &published)
    })
    .await??;

    // Work can also be handed to the apartment directly and awaited
    let lister = factory.clone();
    let running = factory
        .apartment()
        .submit(move || -> oleauto::Result<Vec<DynamicProxy>> {
            lister.running_object_table()?.get_active_objects()
        })
        .await??;
    for object in &running {
        info!("Running object: {}", object);
        info!("Same object as the published greeter: {}", object == instance.proxy());
    }

    tokio::task::spawn_blocking(move || factory.terminate()).await?;
    info!("All operations completed successfully!");

    Ok(())
}

fn run_greeter(factory: &ObjectFactory, args: &Args) -> oleauto::Result<()> {
    let greeter = factory.create::<IGreeter>()?;
    info!("Created {}", greeter.proxy());

    let listener = EventHandlers::new()
        .on("Greeted", |event| {
            info!("Greeted event: {:?}", event);
            Ok(())
        })
        .on_error(|error| warn!("Event delivery failed: {}", error));
    let subscription = greeter.proxy().advise(&greeter_events(), Arc::new(listener))?;

    if let Some(greeting) = &args.greeting {
        greeter.set_greeting(greeting)?;
    }
    for _ in 0..args.times {
        info!("SayHello result: {}", greeter.say_hello(&args.name)?);
    }
    info!("Echo result: {}", greeter.echo("This is a test message!")?);
    info!("Greeter count: {}", greeter.count()?);

    greeter.proxy().unadvise(subscription)?;
    Ok(())
}

/// Make a fresh greeter the running instance of its class
fn publish(factory: &ObjectFactory, runtime: &LoopbackRuntime) -> oleauto::Result<IGreeter> {
    let instance = factory.create::<IGreeter>()?;
    if let Some(hosted) = runtime.instances().last() {
        runtime.register_active_object(GREETER_CLSID, hosted.clone());
    }
    let fetched = factory.fetch::<IGreeter>()?;
    info!("Fetched running greeter: {}", fetched.proxy());
    Ok(instance)
}
