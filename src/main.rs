fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if handle_cli_flags(&args) {
        return;
    }

    blogfeed::init_logger();
    let result = blogfeed::Command::parse(&args).and_then(blogfeed::run);
    if let Err(err) = result {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn handle_cli_flags(args: &[String]) -> bool {
    let mut saw_flag = false;
    for arg in args {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("blogfeed {}", blogfeed::VERSION);
                saw_flag = true;
            }
            "--help" | "-h" => {
                println!("{}", blogfeed::app::USAGE);
                saw_flag = true;
            }
            _ => {}
        }
    }
    saw_flag
}
