use divan::AllocProfiler;

#[global_allocator]
static ALLOC: AllocProfiler = AllocProfiler::system();

fn main() {
    divan::main();
}

fn build_pack(directory: &std::path::Path, compress: bool) -> std::path::PathBuf {
    use cpak_content::{write::PackWriterOptions, PackWriter, BYTE_ARRAY_LOADER_ID};
    use std::io::Write;

    let mut writer = PackWriter::new(
        directory,
        "bench",
        PackWriterOptions::builder()
            .timestamp(1)
            .compress(compress)
            .build(),
    )
    .unwrap();
    writer
        .declare_loader("ByteArray", BYTE_ARRAY_LOADER_ID)
        .unwrap();

    for i in 0..256 {
        writer
            .start_item(&format!("items/{i:03}"), BYTE_ARRAY_LOADER_ID)
            .unwrap();
        let line = format!("item {i} has some fairly repetitive content\n");
        for _ in 0..64 {
            writer.write_all(line.as_bytes()).unwrap();
        }
    }

    writer.finish().unwrap()
}

pub mod read {
    use divan::Bencher;
    use std::io::SeekFrom;

    use cpak_content::{ByteArray, ContentManager, ContentStream, LoaderRegistry, PackManifest};

    #[divan::bench(args = [false, true])]
    fn open(bencher: Bencher, compress: bool) {
        let directory = tempfile::tempdir().unwrap();
        let path = super::build_pack(directory.path(), compress);
        let registry = LoaderRegistry::with_builtins();

        bencher.bench_local(|| {
            divan::black_box(PackManifest::open(&path, &registry).unwrap());
        });
    }

    #[divan::bench(args = [false, true])]
    fn load_all(bencher: Bencher, compress: bool) {
        let directory = tempfile::tempdir().unwrap();
        let path = super::build_pack(directory.path(), compress);
        let manager = ContentManager::open(&path, &LoaderRegistry::with_builtins()).unwrap();
        let names: Vec<String> = manager
            .manifest()
            .entries()
            .map(|e| e.name.to_string())
            .collect();

        bencher.bench_local(|| {
            for name in &names {
                divan::black_box(manager.reload::<ByteArray>(name).unwrap());
            }
        });
    }

    #[divan::bench]
    fn cached_load(bencher: Bencher) {
        let directory = tempfile::tempdir().unwrap();
        let path = super::build_pack(directory.path(), true);
        let manager = ContentManager::open(&path, &LoaderRegistry::with_builtins()).unwrap();
        manager.load::<ByteArray>("items/000").unwrap();

        bencher.bench_local(|| {
            divan::black_box(manager.load::<ByteArray>("items/000").unwrap());
        });
    }

    #[divan::bench(sample_count = 10)]
    fn backward_seek_compressed(bencher: Bencher) {
        let directory = tempfile::tempdir().unwrap();
        let path = super::build_pack(directory.path(), true);
        let manifest = PackManifest::open(&path, &LoaderRegistry::with_builtins()).unwrap();
        let item = manifest.get_item("items/128").unwrap();

        bencher.bench_local(|| {
            let mut stream = ContentStream::open(&item).unwrap();
            stream.seek(SeekFrom::End(-4)).unwrap();
            stream.seek(SeekFrom::Start(0)).unwrap();
            divan::black_box(stream.read_u32().unwrap());
        });
    }
}
