//! Example commands.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    thread,
    time::Duration,
};

use anyhow::Context as _;
use embedded_shell_core::{ContextPropagator, Interruptible};
use embedded_shell_executor::{CommandDescriptor, ContextKind, Invocation, ParamSpec, ScalarType};
use serde::Deserialize;

const GROUP: &str = "Example commands";

#[derive(Debug, Deserialize)]
struct SumArgument {
    a: i64,
    b: i64,
}

#[derive(Debug, Deserialize)]
struct MixedArgument {
    #[serde(default)]
    list: Vec<String>,
    #[serde(default)]
    set: BTreeSet<String>,
    #[serde(default)]
    map: BTreeMap<String, String>,
    #[serde(default)]
    properties: BTreeMap<String, String>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    enabled_all: Option<bool>,
}

fn sum_fields() -> Vec<ParamSpec> {
    vec![
        ParamSpec::int("a").long("add1").help("Add number"),
        ParamSpec::int("b")
            .long("add2")
            .optional()
            .default_value("1")
            .help("Added number"),
    ]
}

fn count_option() -> ParamSpec {
    ParamSpec::int("n")
        .long("num")
        .optional()
        .default_value("5")
        .help("Number of printed messages")
}

/// All example commands.
pub fn all() -> Vec<CommandDescriptor> {
    vec![
        CommandDescriptor::new("sum1", |inv: Invocation| {
            let arg: SumArgument = inv.args().extract("arg")?;
            tracing::info!(result = arg.a + arg.b, "sum1");
            Ok(())
        })
        .group(GROUP)
        .help("Adds two numbers without printing the result")
        .param(ParamSpec::bean("arg", sum_fields())),
        CommandDescriptor::new("sum2", |inv: Invocation| {
            let ctx = inv.require_context()?;
            let sum = inv.args().int("a")? + inv.args().int("b")?;
            ctx.printf(sum.to_string());
            ctx.completed();
            Ok(())
        })
        .group(GROUP)
        .help("Adds two numbers and prints the result")
        .param(ParamSpec::context(ContextKind::Simple))
        .params(sum_fields()),
        CommandDescriptor::new("set", |inv: Invocation| {
            let ctx = inv.require_context()?;
            let set: BTreeSet<String> = inv.args().extract("set")?;
            let list: Vec<i64> = inv.args().extract("list")?;
            ctx.printf(format!("set={set:?}, list={list:?}"));
            ctx.completed();
            Ok(())
        })
        .group(GROUP)
        .help("Collection parameter binding")
        .param(ParamSpec::context(ContextKind::Simple))
        .param(
            ParamSpec::set("set", ScalarType::String)
                .short("s")
                .help("Set of strings"),
        )
        .param(
            ParamSpec::list("list", ScalarType::Integer)
                .short("l")
                .help("List of integers"),
        ),
        CommandDescriptor::new("mixed", |inv: Invocation| {
            let ctx = inv.require_context()?;
            let arg: MixedArgument = inv.args().extract("arg")?;
            ctx.printf(format!("The input parameters are: {arg:?}"));
            ctx.completed();
            Ok(())
        })
        .group(GROUP)
        .help("Bean parameter binding")
        .param(ParamSpec::context(ContextKind::Simple))
        .param(ParamSpec::bean(
            "arg",
            vec![
                ParamSpec::list("list", ScalarType::String).short("l").optional(),
                ParamSpec::set("set", ScalarType::String).short("s").optional(),
                ParamSpec::map("map", ScalarType::String).short("m").optional(),
                ParamSpec::map("properties", ScalarType::String)
                    .short("p")
                    .optional(),
                ParamSpec::boolean("enabled").short("e").optional(),
                ParamSpec::boolean("enabled_all").short("E").optional(),
            ],
        )),
        CommandDescriptor::new("task1", task1)
            .group(GROUP)
            .help("Prints messages from a worker thread (not interruptible)")
            .param(count_option())
            .param(ParamSpec::context(ContextKind::Simple)),
        CommandDescriptor::new("task2", task2)
            .group(GROUP)
            .help("Prints progress from a worker thread (interruptible)")
            .interruptible(Interruptible::Allow)
            .param(count_option())
            .param(ParamSpec::context(ContextKind::Progress)),
        CommandDescriptor::new("task3", task3)
            .group(GROUP)
            .help("Prints progress through the thread-bound context (interruptible)")
            .interruptible(Interruptible::Allow)
            .param(count_option())
            .param(
                ParamSpec::int("sleep")
                    .short("s")
                    .optional()
                    .default_value("100")
                    .help("Delay between messages (ms)"),
            )
            .param(ParamSpec::context(ContextKind::Progress)),
        CommandDescriptor::new("task4", |inv: Invocation| {
            inv.require_context()?.printf("Log print...");
            anyhow::bail!("This is a deliberate error!")
        })
        .group(GROUP)
        .help("Fails on purpose")
        .param(ParamSpec::context(ContextKind::Simple)),
    ]
}

fn task1(inv: Invocation) -> anyhow::Result<()> {
    let num = inv.args().int("n")?;
    let ctx = inv.require_context()?;
    inv.propagator().spawn_bound(ctx, move |ctx| {
        ctx.printf("Log print...");
        for i in 1..=num {
            let message = format!("This is the {i}th message!");
            tracing::info!(invocation_id = %ctx.invocation_id(), "{message}");
            ctx.printf(message);
            thread::sleep(Duration::from_millis(200));
        }
        ctx.printf("Log print finished!");
        ctx.completed();
    })?;
    Ok(())
}

fn task2(inv: Invocation) -> anyhow::Result<()> {
    let num = u64::try_from(inv.args().int("n")?).context("num must not be negative")?;
    let progress = inv.require_progress()?;
    let ctx = Arc::clone(progress.context());
    inv.propagator().spawn_bound(&ctx, move |_| {
        progress.printf_progress("Log2 print...", 0.05);
        let mut i = 1;
        while !progress.is_interrupted() && i <= num {
            let message = format!("This is the {i}th message!");
            tracing::info!(invocation_id = %progress.invocation_id(), "{message}");
            progress.printf_counted(message, num, i);
            thread::sleep(Duration::from_millis(200));
            i += 1;
        }
        progress.completed_with("Log2 print finished!");
    })?;
    Ok(())
}

fn task3(inv: Invocation) -> anyhow::Result<()> {
    let num = u64::try_from(inv.args().int("n")?).context("num must not be negative")?;
    let sleep = u64::try_from(inv.args().int("sleep")?).context("sleep must not be negative")?;
    let progress = inv.require_progress()?;
    let _binding = inv.propagator().bind(progress.context());
    print_bound_progress(num, Duration::from_millis(sleep))
}

/// Reports through whatever context is bound to this thread.
fn print_bound_progress(num: u64, delay: Duration) -> anyhow::Result<()> {
    let ctx = ContextPropagator::current().context("no context bound to this thread")?;
    let progress = ctx.progress_view();
    progress.printf_progress("Log3 print...", 0.05);
    let mut i = 1;
    while !progress.is_interrupted() && i <= num {
        let message = format!("This is the {i}th message!");
        tracing::info!(invocation_id = %progress.invocation_id(), "{message}");
        progress.printf_counted(message, num, i);
        thread::sleep(delay);
        i += 1;
    }
    progress.completed_with("Log3 print finished!");
    Ok(())
}
