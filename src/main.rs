//! Main entry point for the Windows Memory Parser tool
use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

use winmemparser::cli::args::{Cli, OutputFormatArg, PluginCommand};
use winmemparser::core::layout::KernelLayout;
use winmemparser::core::profile::AnalysisConfig;
use winmemparser::formats::traits::{OutputDestination, OutputFormat, OutputWriter};
use winmemparser::kernel::process_locator::{ProcessLocator, SystemAnchor};
use winmemparser::memory::{MemoryMap, PhysicalMemory};
use winmemparser::plugins::plugin_trait::{AnalysisContext, ForensicPlugin, PluginOutput};
use winmemparser::plugins::{list_plugins, PsListPlugin, VadInfoPlugin, VtopPlugin};
use winmemparser::translation::paging::PagingMode;
use winmemparser::translation::AddressTranslator;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    if cli.list_plugins {
        println!("Available plugins:");
        for (name, description) in list_plugins() {
            println!("  {} - {}", name, description);
        }
        return Ok(());
    }

    let config = build_config(&cli)?;
    let plugins = select_plugins(&cli)?;

    let memory = MemoryMap::new(&cli.memory_dump).with_context(|| {
        format!("cannot open memory image {}", cli.memory_dump.display())
    })?;
    info!(
        "opened {} ({} bytes, {:?} paging)",
        cli.memory_dump.display(),
        memory.len(),
        config.paging
    );
    let translator = AddressTranslator::with_mode(&memory, config.paging);

    let anchor = if plugins.iter().any(|p| p.requires_anchor()) {
        Some(locate_system(&translator, &config)?)
    } else {
        None
    };

    let context = AnalysisContext::new(&translator, &config, anchor);

    let output_format = match cli.format {
        OutputFormatArg::Text => OutputFormat::Text,
        OutputFormatArg::Csv => OutputFormat::Csv,
        OutputFormatArg::Json => OutputFormat::Json,
        OutputFormatArg::Jsonl => OutputFormat::Jsonl,
    };
    let output_dest = match &cli.output {
        Some(path) => OutputDestination::File(path.clone()),
        None => OutputDestination::Stdout,
    };
    let output_writer = OutputWriter::new(output_format, output_dest);

    for plugin in &plugins {
        execute_plugin(plugin.as_ref(), &context, &output_writer)?;
    }

    Ok(())
}

/// `RUST_LOG` wins over the flags when set.
fn init_logging(cli: &Cli) {
    let default_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

/// Profile first, then command-line overrides.
fn build_config(cli: &Cli) -> Result<AnalysisConfig> {
    let mut config = match &cli.profile {
        Some(path) => AnalysisConfig::load_from_file(path)
            .with_context(|| format!("cannot load profile {}", path.display()))?,
        None => AnalysisConfig::default(),
    };

    if let Some(build) = cli.build {
        config.layout = KernelLayout::for_build(build.into());
    }
    if let Some(dtb) = cli.system_dtb {
        config.system_dtb = Some(dtb);
    }
    if cli.five_level {
        config.paging = PagingMode::FiveLevel;
    }
    if let Some(max) = cli.max_processes {
        config.limits.max_processes = max;
    }
    Ok(config)
}

fn select_plugins(cli: &Cli) -> Result<Vec<Box<dyn ForensicPlugin>>> {
    if cli.all {
        let plugins: Vec<Box<dyn ForensicPlugin>> = vec![
            Box::new(PsListPlugin::default()),
            Box::new(VadInfoPlugin::default()),
        ];
        return Ok(plugins);
    }

    let plugin: Box<dyn ForensicPlugin> = match &cli.plugin {
        None => {
            info!("no plugin specified, running pslist");
            Box::new(PsListPlugin::default())
        }
        Some(PluginCommand::Pslist { name }) => Box::new(PsListPlugin::new(name.as_deref())?),
        Some(PluginCommand::Vadinfo { name, offset }) => {
            Box::new(VadInfoPlugin::new(name.as_deref(), *offset)?)
        }
        Some(PluginCommand::Vtop { address, dtb }) => Box::new(VtopPlugin {
            address: *address,
            dtb: *dtb,
        }),
    };
    Ok(vec![plugin])
}

fn locate_system(translator: &AddressTranslator, config: &AnalysisConfig) -> Result<SystemAnchor> {
    let total = translator.memory().size();
    let progress = ProgressBar::new(total);
    progress.set_style(
        ProgressStyle::with_template("{msg} [{bar:40}] {bytes}/{total_bytes}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    progress.set_message("Scanning for System");

    let located = ProcessLocator::new(translator, config)
        .locate_with_progress(|scanned, _| progress.set_position(scanned));
    progress.finish_and_clear();

    let anchor = located.context(
        "no System process record validated; check --build and --system-dtb",
    )?;
    info!(
        "System process at 0x{:x}, DTB 0x{:x}",
        anchor.kprocess, anchor.dtb
    );
    Ok(anchor)
}

fn execute_plugin(
    plugin: &dyn ForensicPlugin,
    context: &AnalysisContext,
    output_writer: &OutputWriter,
) -> Result<()> {
    info!("running plugin {}", plugin.name());
    let output = plugin
        .run(context)
        .with_context(|| format!("plugin {} failed", plugin.name()))?;

    match output {
        PluginOutput::Processes(list) => {
            if list.processes.is_empty() {
                info!("no processes matched the specified criteria");
            }
            output_writer.write_processes(&list)?;
        }
        PluginOutput::Vads(list) => output_writer.write_vads(&list)?,
        PluginOutput::Translation(translation) => output_writer.write_translation(&translation)?,
    }
    Ok(())
}
