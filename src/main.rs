use clap::Parser;
use std::fs;
use std::path::PathBuf;

use nachos_vm::{console, FileStore, Machine, VmConfig};

#[derive(Parser)]
#[command(name = "nachos-vm")]
#[command(about = "Replay a memory reference string against the demand pager", long_about = None)]
struct Cli {
    /// NOFF executable to load
    program: PathBuf,

    /// References such as `r300`, `w0x500` (read or write, virtual address)
    refs: Vec<String>,

    /// File with one reference per line (`#` starts a comment)
    #[arg(short, long)]
    trace: Option<PathBuf>,

    /// Swap file, created or truncated
    #[arg(long, default_value = "SWAP")]
    swap: PathBuf,

    /// Physical frames
    #[arg(long, default_value_t = nachos_vm::config::NUM_PHYS_PAGES)]
    frames: usize,

    /// TLB slots
    #[arg(long, default_value_t = nachos_vm::config::TLB_SIZE)]
    tlb: usize,

    /// Swap slots
    #[arg(long, default_value_t = nachos_vm::config::SWAP_SLOTS)]
    swap_slots: usize,

    /// Map every page at load time instead of on demand
    #[arg(long)]
    eager: bool,

    /// Debug flags (v paging, h swap, t context, a address space, + all)
    #[arg(short, long, default_value = "")]
    debug: String,

    /// Print TLB, frame directory and page table at the end
    #[arg(long)]
    dump: bool,
}

/// One entry of a reference string
struct Reference {
    write: bool,
    vaddr: usize,
}

fn parse_reference(text: &str) -> Result<Reference, String> {
    let (write, addr) = match text.split_at_checked(1) {
        Some(("r", rest)) | Some(("R", rest)) => (false, rest),
        Some(("w", rest)) | Some(("W", rest)) => (true, rest),
        _ => return Err(format!("bad reference `{}`: expected r<addr> or w<addr>", text)),
    };
    let vaddr = match addr.strip_prefix("0x") {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => addr.parse(),
    }
    .map_err(|e| format!("bad address in `{}`: {}", text, e))?;
    Ok(Reference { write, vaddr })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut refs = Vec::new();
    if let Some(path) = &cli.trace {
        for line in fs::read_to_string(path)?.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if !line.is_empty() {
                refs.push(parse_reference(line)?);
            }
        }
    }
    for text in &cli.refs {
        refs.push(parse_reference(text)?);
    }

    console::enable(&cli.debug);
    let config = VmConfig::new()
        .with_frames(cli.frames)
        .with_tlb_size(cli.tlb)
        .with_swap_slots(cli.swap_slots)
        .with_demand_paging(!cli.eager);

    let swap = FileStore::create(&cli.swap)?;
    let mut machine = Machine::new(config, Box::new(swap))?;
    let program = FileStore::open(&cli.program)?;
    let id = machine.create_space(Box::new(program))?;
    machine.switch_to(id)?;

    let space = machine.space(id)?;
    let header = space.header();
    println!(
        "{}: code {} bytes, data {} bytes, bss {} bytes",
        cli.program.display(),
        header.code.size,
        header.init_data.size,
        header.uninit_data.size
    );
    println!("{} pages, {} frames, {} TLB slots", space.num_pages(), cli.frames, cli.tlb);

    for (i, reference) in refs.iter().enumerate() {
        let op = if reference.write { 'w' } else { 'r' };
        let result = if reference.write {
            machine.write_byte(reference.vaddr, i as u8).map(|()| i as u8)
        } else {
            machine.read_byte(reference.vaddr)
        };
        match result {
            Ok(value) => println!("{}{:#x} = {:#04x}", op, reference.vaddr, value),
            Err(e) if e.is_fatal() => {
                eprintln!("{}{:#x}: {} (machine halted)", op, reference.vaddr, e);
                return Err(e.into());
            }
            Err(e) => println!("{}{:#x}: {}", op, reference.vaddr, e),
        }
    }

    if cli.dump {
        print!("{}", machine.dump_tlb());
        print!("{}", machine.dump_directory());
        print!("{}", machine.dump_page_table(id)?);
    }
    machine.check_invariants()?;

    let stats = machine.stats();
    println!("Paging: tlb misses {}, faults {}, evictions {}", stats.tlb_misses, stats.page_faults, stats.evictions);
    println!(
        "Loads: image {}, zero-fill {}, swap in {}, swap out {}, discarded {}",
        stats.image_loads, stats.zero_fills, stats.swap_ins, stats.swap_outs, stats.discards
    );
    Ok(())
}
