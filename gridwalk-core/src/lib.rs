use colored::Colorize;

pub mod config;
pub mod crawl;
pub mod report;
pub mod store;

pub fn print_banner() {
    let banner = r#"
   ██████╗ ██████╗ ██╗██████╗ ██╗    ██╗ █████╗ ██╗     ██╗  ██╗
  ██╔════╝ ██╔══██╗██║██╔══██╗██║    ██║██╔══██╗██║     ██║ ██╔╝
  ██║  ███╗██████╔╝██║██║  ██║██║ █╗ ██║███████║██║     █████╔╝
  ██║   ██║██╔══██╗██║██║  ██║██║███╗██║██╔══██║██║     ██╔═██╗
  ╚██████╔╝██║  ██║██║██████╔╝╚███╔███╔╝██║  ██║███████╗██║  ██╗
   ╚═════╝ ╚═╝  ╚═╝╚═╝╚═════╝  ╚══╝╚══╝ ╚═╝  ╚═╝╚══════╝╚═╝  ╚═╝"#;
    println!("{}", banner.bright_cyan().bold());
    println!(
        "  {} {}\n",
        "passive web surface mapper".bright_white(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
}
