use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match medchat_lib::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("medchat: {e}");
            ExitCode::FAILURE
        }
    }
}
