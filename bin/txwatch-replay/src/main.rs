use tokio::runtime::Handle;
use tracing::*;
use txwatch_common::logging;
use txwatch_config::logging::LoggingConfig;

use crate::{
    args::{Args, EnvArgs},
    helpers::get_config,
    output::JsonLineSink,
    scenario::{load_scenario, ScenarioClient},
};

mod args;
mod errors;
mod helpers;
mod output;
mod replay;
mod scenario;

fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();
    if let Err(e) = main_inner(args) {
        eprintln!("FATAL ERROR: {e}");

        return Err(e);
    }

    Ok(())
}

fn main_inner(args: Args) -> anyhow::Result<()> {
    // Everything happens on this thread, events are handled one at a time.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let config = get_config(&args, &EnvArgs::from_env())?;

    // Init the logging before we do anything else that logs.
    init_logging(runtime.handle(), &config.logging);

    let scenario = load_scenario(&args.scenario)?;
    let client = ScenarioClient::new(scenario.blocks);
    let sink = JsonLineSink::new(std::io::stdout().lock());

    let res = runtime.block_on(replay::replay(
        config.tracker,
        client.clone(),
        sink,
        scenario.events,
        args.keep_going,
    ));

    let res = res.map(|(summary, sink)| {
        info!(
            notifications = sink.written(),
            write_errors = sink.write_errors(),
            unpinned = client.unpinned().len(),
            failed_events = summary.failed_events,
            "done"
        );
    });

    logging::finalize();
    Ok(res?)
}

fn init_logging(rt: &Handle, lconf: &LoggingConfig) {
    let base = "txwatch-replay";
    let mut lconfig = match &lconf.service_label {
        Some(label) => logging::LoggerConfig::new(logging::get_whoami_string(base, Some(label))),
        None => logging::LoggerConfig::with_base_name(base),
    };

    // Config wins over the env.
    let otlp_url = lconf.otlp_url.clone().or_else(logging::get_otlp_url_from_env);
    if let Some(url) = &otlp_url {
        lconfig.set_otlp_url(url.clone());
    }

    {
        // The OTLP batch exporter needs a runtime context to spawn onto.
        let _g = rt.enter();
        logging::init(lconfig);
    }

    if let Some(url) = &otlp_url {
        info!(%url, "using OpenTelemetry tracing output");
    }
}
