use clap::{Args, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use std::path::PathBuf;
use tackle_controller::generators::{HELLO_WORLD_TEMPLATE, generate_hardware, generate_template};

#[derive(Args, Debug)]
pub struct GenerateArgs {
    #[command(subcommand)]
    kind: GenerateKind,
}

#[derive(Subcommand, Debug)]
enum GenerateKind {
    /// Hardware with random MACs and documentation-range addresses
    Hardware {
        /// Resource name
        #[arg(long, default_value = "machine-0")]
        name: String,

        /// Number of network interfaces
        #[arg(long, default_value_t = 1)]
        interfaces: usize,
    },
    /// Template wrapping a workflow definition
    Template {
        /// Resource name
        #[arg(long, default_value = "hello-world")]
        name: String,

        /// Read the workflow definition from a file instead of using hello-world
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

pub fn run(args: GenerateArgs) -> Result<()> {
    let json = match args.kind {
        GenerateKind::Hardware { name, interfaces } => {
            let hardware = generate_hardware(&name, interfaces)?;
            serde_json::to_string_pretty(&hardware)?
        }
        GenerateKind::Template { name, file } => {
            let data = match file {
                Some(path) => std::fs::read_to_string(&path)
                    .wrap_err_with(|| format!("failed to read {}", path.display()))?,
                None => HELLO_WORLD_TEMPLATE.to_string(),
            };
            let template = generate_template(&name, &data);
            template.validate()?;
            serde_json::to_string_pretty(&template)?
        }
    };

    println!("{}", json);
    Ok(())
}
