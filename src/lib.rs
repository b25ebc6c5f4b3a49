// Recursive descent over deeply nested C expressions can go deep; the
// per-binary entry helper spawns the real work on a large-stack thread.

pub mod common;
pub mod frontend;
pub mod backend;
pub mod assembler;
pub mod linker;
pub mod driver;

/// Shared entry point for the three stage binaries. Spawns the stage driver
/// on a thread with a large stack so deeply nested source constructs don't
/// overflow, then forwards the stage's exit code to the process.
pub fn stage_main(stage: driver::Stage) -> ! {
    const STACK_SIZE: usize = 64 * 1024 * 1024; // 64 MB
    let builder = std::thread::Builder::new().stack_size(STACK_SIZE);
    let handler = builder
        .spawn(move || {
            let args: Vec<String> = std::env::args().collect();
            driver::run_stage(stage, &args)
        })
        .expect("failed to spawn main thread");

    match handler.join() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            if let Some(s) = e.downcast_ref::<&str>() {
                eprintln!("{}: internal error: {}", stage.name(), s);
            } else if let Some(s) = e.downcast_ref::<String>() {
                eprintln!("{}: internal error: {}", stage.name(), s);
            } else {
                eprintln!("{}: internal error (thread panicked)", stage.name());
            }
            std::process::exit(1);
        }
    }
}
