use clap::{Parser, Subcommand};

use niceflow::flist;
use niceflow::runner;
use niceflow::Layout;

#[derive(Parser, Debug)]
#[clap(version, about)]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate pkg and top simulation compilation file lists
    Flist {
        /// Prepend UVM incdir and pkg path to top of file list
        #[clap(long)]
        uvm: bool,

        /// Leave the UVM library out of the file lists (default)
        #[clap(long, overrides_with = "uvm")]
        no_uvm: bool,
    },

    /// Generate the combined file list with bender and run the testbench
    Sim,
}

fn gen_flist(uvm: bool) -> i32 {
    let layout = match Layout::from_install_root() {
        Ok(layout) => layout,
        Err(e) => {
            eprintln!("{:?}", e);
            return -1;
        }
    };

    match flist::generate(&layout, &flist::Config { uvm }) {
        Ok(rv) => rv,
        Err(e) => {
            eprintln!("{:?}", e);
            -1
        }
    }
}

fn sim() -> i32 {
    let layout = match Layout::from_install_root() {
        Ok(layout) => layout,
        Err(e) => {
            eprintln!("{:?}", e);
            return -1;
        }
    };

    let bender = runner::Bender::from_env();
    let icarus = runner::Icarus::from_env();
    match runner::run(&layout.sim_dir(), &bender, &icarus) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{:?}", e);
            -1
        }
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Commands::Flist { uvm, no_uvm } => {
            std::process::exit(gen_flist(uvm && !no_uvm));
        }
        Commands::Sim => {
            std::process::exit(sim());
        }
    }
}
