use std::env;
use std::fs;
use std::process::ExitCode;

use basin_kernel::kern::Kernel;
use basin_kernel::{Integration, Vm};
use log::{error, info};

const DEFAULT_STEP_BUDGET: u64 = 100_000;

struct Args {
    elf_path: String,
    step_budget: u64,
}

fn parse_args() -> Option<Args> {
    let mut elf_path = None;
    let mut step_budget = DEFAULT_STEP_BUDGET;
    let mut it = env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--steps" => step_budget = it.next()?.parse().ok()?,
            path => elf_path = Some(path.to_string()),
        }
    }
    Some(Args { elf_path: elf_path?, step_budget })
}

fn main() -> ExitCode {
    env_logger::init();

    let Some(args) = parse_args() else {
        eprintln!("usage: basin-run <elf-path> [--steps N]");
        return ExitCode::FAILURE;
    };

    let image = match fs::read(&args.elf_path) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!("failed to read {}: {err}", args.elf_path);
            return ExitCode::FAILURE;
        }
    };

    let mut vm = Vm::new();
    let entry = match load_image(&mut vm, &image) {
        Ok(entry) => entry,
        Err(err) => {
            error!("failed to parse ELF image {}: {err}", args.elf_path);
            return ExitCode::FAILURE;
        }
    };

    let mut integration = Integration::new(vm, Kernel::new());
    integration.finish_init();

    let pid = {
        let mut kernel = integration.kernel.borrow_mut();
        let stack_top = Kernel::default_user_stack_top();
        match kernel.processes.spawn(entry, stack_top) {
            Ok(pid) => pid,
            Err(err) => {
                error!("spawn failed: {err}");
                return ExitCode::FAILURE;
            }
        }
    };
    integration.kernel.borrow_mut().scheduler.set_current(pid);
    integration.vm.regs.pc = entry;

    loop {
        let running = integration.schedule_and_run_next(args.step_budget);
        info!(
            "step budget consumed; instructions retired so far: {}",
            integration.vm.perf.instructions_retired
        );
        if !running {
            break;
        }
    }

    ExitCode::SUCCESS
}

fn load_image(vm: &mut Vm, image: &[u8]) -> Result<u64, basin_kernel::vm::VmFault> {
    use basin_kernel::vm::elf::{self, LoadKind};
    let parsed = elf::parse(image, LoadKind::User)?;
    elf::load_segments(&parsed, image, &mut vm.memory)?;
    Ok(parsed.entry)
}
