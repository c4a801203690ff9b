use clap::Parser;

use pyjail::error::NiceError;
use pyjail::{main_server, Opt};

fn main() {
    let opt = Opt::parse();
    opt.logger.enable_log();

    main_server(opt).nice_unwrap()
}
