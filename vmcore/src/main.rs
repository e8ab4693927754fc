use std::process;

use clap::Parser as ClapParser;

use vmcore::{
    ArgumentsDescriptor, ClassId, FunctionKind, HeapCreateInfo, Isolate, IsolateCreateInfo,
    Nullability, ObjectResult, Space, scrub_name,
};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Heap capacity in MiB
    #[arg(long, help = "Total heap capacity in MiB")]
    heap_mb: Option<usize>,

    /// Share of the heap used for new space
    #[arg(long, help = "New space share of the heap in percent")]
    new_space_percent: Option<usize>,

    /// Object alignment in bytes
    #[arg(long, help = "Object alignment in bytes, a power of two")]
    alignment: Option<usize>,

    #[arg(long, help = "Initial bucket count of megamorphic caches")]
    megamorphic_capacity: Option<usize>,

    #[arg(long, help = "Method count at which classes build a name index")]
    function_hash_threshold: Option<usize>,

    #[arg(long, help = "Receiver checks before a call site goes megamorphic")]
    ic_data_max_checks: Option<usize>,

    /// Number of receiver classes fed into the demo megamorphic cache
    #[arg(long, default_value_t = 12)]
    receivers: u32,

    #[arg(long, default_value = "info", help = "Log level filter, e.g. debug or vmcore=trace")]
    log_level: String,
}

impl Cli {
    fn create_info(&self) -> IsolateCreateInfo {
        IsolateCreateInfo {
            heap: HeapCreateInfo {
                capacity: self.heap_mb.map_or(0, |mb| mb * 1024 * 1024),
                new_space_percent: self.new_space_percent,
                alignment: self.alignment,
            },
            megamorphic_initial_capacity: self.megamorphic_capacity,
            function_hash_threshold: self.function_hash_threshold,
            ic_data_max_checks: self.ic_data_max_checks,
        }
    }
}

fn demo(isolate: &Isolate, receivers: u32) -> ObjectResult<()> {
    for name in ["_List@9187", "get:_length@2", "set:foo", "_MyClass@6328321.named", "::"] {
        log::info!("scrub {name:?} -> {:?}", scrub_name(name));
    }

    let a = isolate.canonicalize_value(isolate.new_integer(1 << 62, Space::New)?)?;
    let b = isolate.canonicalize_value(isolate.new_integer(1 << 62, Space::New)?)?;
    log::info!(
        "mint {} canonical: {}",
        isolate.to_cstring(a),
        a == b
    );
    let half = isolate.new_double(0.5, Space::New)?;
    log::info!("double {}", isolate.to_cstring(half.value()));

    let list_of_int = isolate.canonical_type_of(ClassId::ARRAY, &[isolate.int_type()], Nullability::Legacy)?;
    let again = isolate.canonical_type_of(ClassId::ARRAY, &[isolate.int_type()], Nullability::Legacy)?;
    log::info!(
        "{} canonical: {}, <: List<dynamic>: {}",
        isolate.to_cstring(list_of_int.value()),
        list_of_int == again,
        isolate.is_subtype_of(
            list_of_int,
            isolate.canonical_type_of(ClassId::ARRAY, &[isolate.dynamic_type()], Nullability::Legacy)?
        )
    );

    let descriptor = isolate.new_arguments_descriptor(&ArgumentsDescriptor::positional(0, 1))?;
    let cache = isolate.new_megamorphic_cache("toString", descriptor)?;
    for i in 0..receivers {
        let cid = isolate.new_class(&format!("Receiver{i}"), None)?;
        isolate.ensure_is_finalized(cid)?;
        let target = isolate.new_function("toString", FunctionKind::Regular, cid, isolate.string_type())?;
        isolate.add_function(cid, target);
        isolate.megamorphic_insert(cache, cid, target);
    }
    log::info!("{}", isolate.to_cstring(cache.value()));
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .parse_filters(&cli.log_level)
        .format_timestamp(None)
        .init();

    let isolate = Isolate::new(cli.create_info());
    if let Err(error) = demo(&isolate, cli.receivers) {
        log::error!("demo failed: {error}");
        process::exit(1);
    }

    let heap = isolate.heap();
    log::info!("{} objects, {} bytes in use", heap.len(), heap.used_bytes());
    for (cid, stats) in heap.all_allocation_stats() {
        log::info!(
            "{:>28} {:>6} objects {:>9} bytes",
            isolate.class_name(cid),
            stats.count,
            stats.bytes
        );
    }
}
