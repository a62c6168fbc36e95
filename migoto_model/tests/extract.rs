use std::path::Path;

use hexlit::hex;
use indoc::indoc;
use migoto_lib::{
    buffer::ByteBuffer,
    dump::LOG_FILE_NAME,
    semantic::{AbstractSemantic, Semantic},
    vertex_format::VertexFormat,
};
use migoto_model::{
    config::Configuration,
    error::ExtractError,
    extractor::PoseFormat,
    metadata::{ComponentMetadata, ObjectMetadata, ShapeKeyMetadata},
    output::TextureFilter,
};
use pretty_assertions::assert_eq;

const SHADERS: &str = "vs=a0a0a0a0-ps=b0b0b0b0";

fn write(dir: &Path, call: u32, slot: &str, ext: &str, bytes: &[u8]) {
    let name = format!("{call:06}-{slot}-{SHADERS}.{ext}");
    std::fs::write(dir.join(name), bytes).unwrap();
}

fn f32_bytes(values: impl IntoIterator<Item = f32>) -> Vec<u8> {
    values.into_iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn u32_bytes(values: impl IntoIterator<Item = u32>) -> Vec<u8> {
    values.into_iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn bone(value: f32) -> [f32; 12] {
    [value, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0]
}

fn index_text(first_index: u32, faces: &str) -> String {
    format!(
        "byte offset: {}\nfirst index: {first_index}\nindex count: 6\ntopology: trianglelist\nformat: DXGI_FORMAT_R16_UINT\n\n{faces}",
        first_index * 2
    )
}

/// Two draws of an object with 8 vertices split into two components of 4 vertices.
fn write_draws(dir: &Path, calls: [u32; 2]) {
    let vertex_count = 8;

    // Vertex buffers bound to both draws.
    let positions = f32_bytes((0..vertex_count).flat_map(|i| [i as f32, 0.0, 0.0]));
    let vectors = vec![0u8; vertex_count * 8];
    let texcoords = vec![0u8; vertex_count * 16];
    let colors = vec![255u8; vertex_count * 4];
    // Each vertex uses local groups 0 and 1.
    let blend: Vec<u8> = (0..vertex_count)
        .flat_map(|_| [0, 1, 0, 0, 128, 127, 0, 0])
        .collect();
    let pose = u32_bytes([0, 64, 64, 0, 128, 0, 0, 0]);

    for call in calls {
        write(dir, call, "vb0=0000aaaa", "buf", &positions);
        write(dir, call, "vb1=0000a1a1", "buf", &vectors);
        write(dir, call, "vb2=0000a2a2", "buf", &texcoords);
        write(dir, call, "vb3=0000a3a3", "buf", &colors);
        write(dir, call, "vb4=0000a4a4", "buf", &blend);
        write(dir, call, "vb5=0000a5a5", "buf", &[0u8; 4]);
        write(dir, call, "vs-cb0=0000c0c0", "buf", &pose);
        write(dir, call, "ib=0000bbbb", "buf", &[0u8; 12]);
        write(dir, call, "ps-t0=0000d0d0", "dds", &[0u8; 64]);
    }

    let [first, second] = calls;
    // The second skeleton starts with a new bone followed by the first bone of the first skeleton.
    write(dir, first, "vs-cb4=0000c4c1", "buf", &f32_bytes(bone(1.0).into_iter().chain(bone(2.0))));
    write(dir, second, "vs-cb4=0000c4c2", "buf", &f32_bytes(bone(3.0).into_iter().chain(bone(1.0))));
    write(dir, second, "ps-t1=0000e0e0", "dds", &[0u8; 8]);

    write(dir, first, "ib=0000bbbb", "txt", index_text(0, "0 1 2\n2 1 3\n").as_bytes());
    write(dir, second, "ib=0000bbbb", "txt", index_text(6, "4 5 6\n6 5 7\n").as_bytes());
}

fn write_capture(dir: &Path, log: &str) {
    write_draws(dir, [1, 2]);
    std::fs::write(dir.join(LOG_FILE_NAME), log).unwrap();
}

const LOG: &str = indoc! {"
    analyse_options: 00000000
    000001 IASetVertexBuffers(StartSlot:0, NumBuffers:6)
    000001 DrawIndexed(IndexCount:6, StartIndexLocation:0, BaseVertexLocation:0)
    000002 IASetVertexBuffers(StartSlot:0, NumBuffers:6)
    000002 DrawIndexed(IndexCount:6, StartIndexLocation:6, BaseVertexLocation:0)
"};

fn component_values(
    vb: &[u8],
    fmt: &VertexFormat,
    semantic: impl Into<AbstractSemantic>,
) -> Vec<f64> {
    let buffer = ByteBuffer::from_bytes(fmt.layout.clone(), vb).unwrap();
    buffer.values(&semantic.into()).unwrap()
}

fn draw_log(calls: [u32; 2]) -> String {
    let [first, second] = calls;
    format!(
        "{first:06} IASetVertexBuffers(StartSlot:0, NumBuffers:7)\n\
         {first:06} DrawIndexed(IndexCount:6, StartIndexLocation:0, BaseVertexLocation:0)\n\
         {second:06} IASetVertexBuffers(StartSlot:0, NumBuffers:7)\n\
         {second:06} DrawIndexed(IndexCount:6, StartIndexLocation:6, BaseVertexLocation:0)\n"
    )
}

fn dispatch_log(call: u32, thread_group_count_y: u32) -> String {
    format!(
        "{call:06} Dispatch(ThreadGroupCountX:1, ThreadGroupCountY:{thread_group_count_y}, ThreadGroupCountZ:1)\n"
    )
}

fn u16_bytes(values: impl IntoIterator<Item = u16>) -> Vec<u8> {
    values.into_iter().flat_map(|v| v.to_le_bytes()).collect()
}

const SCALE_HASH: &str = "00005ca1";
const OFFSETS_HASH: &str = "00005c0f";

/// The draws of [write_draws] with shape keys from three compute passes.
/// Each item of `cs1_calls` is the shader and dispatch y of a call of the second pass.
fn write_shapekey_capture(dir: &Path, cs1_calls: &[(&str, u32)]) {
    let compute = |call: u32, slot: &str, shader: &str, bytes: &[u8]| {
        let name = format!("{call:06}-{slot}-{shader}.buf");
        std::fs::write(dir.join(name), bytes).unwrap();
    };

    let mut log = String::from("analyse_options: 00000000\n");

    // The first pass writes the scale buffer read by the second pass.
    compute(1, &format!("u0={SCALE_HASH}"), "cs=c0c0c0c0", &[0u8; 16]);
    log.push_str(&dispatch_log(1, 1));

    // Shape key 0 moves vertices 1 and 2, shape key 1 is empty, and shape key 2 moves vertex 5.
    let mut offsets = vec![0, 2, 2, 3];
    offsets.resize(128, 3);
    let vertex_ids = u32_bytes([1, 2, 5, 0]);
    // Half precision deltas with 6 values per row.
    let deltas = u16_bytes([
        0x3c00, 0, 0, 0, 0, 0, //
        0, 0x3800, 0, 0, 0, 0, //
        0, 0, 0x4000, 0, 0, 0, //
        0, 0, 0, 0, 0, 0,
    ]);

    let mut call = 2;
    for &(shader, dispatch_y) in cs1_calls {
        compute(call, &format!("u1={SCALE_HASH}"), shader, &[0u8; 16]);
        compute(call, &format!("u0={OFFSETS_HASH}"), shader, &[0u8; 16]);
        compute(call, "cs-cb0=0000cb00", shader, &u32_bytes(offsets.clone()));
        compute(call, "cs-t0=00007000", shader, &vertex_ids);
        compute(call, "cs-t1=00007100", shader, &deltas);
        log.push_str(&dispatch_log(call, dispatch_y));
        call += 1;
    }

    // The third pass writes the buffer bound to the draws.
    compute(call, &format!("u0={OFFSETS_HASH}"), "cs=c2c2c2c2", &[0u8; 16]);
    log.push_str(&dispatch_log(call, 1));

    let draws = [call + 1, call + 2];
    write_draws(dir, draws);
    for draw in draws {
        write(dir, draw, &format!("vb6={OFFSETS_HASH}"), "buf", &[0u8; 16]);
    }
    log.push_str(&draw_log(draws));

    std::fs::write(dir.join(LOG_FILE_NAME), log).unwrap();
}

#[test]
fn extract_split_object() {
    let dir = tempfile::tempdir().unwrap();
    write_capture(dir.path(), LOG);

    let objects = migoto_model::extract(
        dir.path(),
        &Configuration::default(),
        &TextureFilter::default(),
    )
    .unwrap();

    assert_eq!(vec!["0000aaaa"], objects.keys().map(|k| k.as_str()).collect::<Vec<_>>());
    let object = &objects["0000aaaa"];

    assert_eq!(
        ObjectMetadata {
            ib_hash: "0000bbbb".into(),
            vb0_hash: "0000aaaa".into(),
            vb1_hash: "0000a1a1".into(),
            vertex_count: 8,
            index_count: 12,
            components: vec![
                ComponentMetadata {
                    pose_format: PoseFormat::Static,
                    vertex_offset: 0,
                    vertex_count: 4,
                    index_offset: 0,
                    index_count: 6,
                    vg_offset: 0,
                    vg_count: 2,
                },
                ComponentMetadata {
                    pose_format: PoseFormat::Static,
                    vertex_offset: 4,
                    vertex_count: 4,
                    index_offset: 6,
                    index_count: 6,
                    vg_offset: 2,
                    vg_count: 2,
                },
            ],
            shapekeys: ShapeKeyMetadata::default(),
        },
        object.metadata
    );

    let [c0, c1] = object.components.as_slice() else {
        panic!("expected 2 components")
    };
    assert_eq!(48, c0.fmt.stride);
    assert_eq!(4 * 48, c1.vb.len());
    assert_eq!(
        hex!(0000 0100 0200 0200 0100 0300),
        c1.ib.as_slice()
    );

    assert_eq!(
        vec![4.0, 0.0, 0.0, 5.0, 0.0, 0.0, 6.0, 0.0, 0.0, 7.0, 0.0, 0.0],
        component_values(&c1.vb, &c1.fmt, Semantic::Position)
    );

    // The second component's group 1 uses the bone of the first component's group 0.
    assert_eq!(
        [0.0, 1.0, 0.0, 0.0].repeat(4),
        component_values(&c0.vb, &c0.fmt, Semantic::BlendIndices)
    );
    assert_eq!(
        [2.0, 0.0, 2.0, 2.0].repeat(4),
        component_values(&c1.vb, &c1.fmt, Semantic::BlendIndices)
    );

    // The descriptor parses back to the same layout.
    let fmt: VertexFormat = c1.fmt.to_string().parse().unwrap();
    assert_eq!(c1.fmt, fmt);

    let usage = object.texture_usage();
    assert_eq!(
        vec!["ps-t0"],
        usage.0["Component 0"].keys().collect::<Vec<_>>()
    );
    assert_eq!(
        vec!["ps-t0", "ps-t1"],
        usage.0["Component 1"].keys().collect::<Vec<_>>()
    );

    let metadata = ObjectMetadata::from_json(&object.metadata.to_json().unwrap()).unwrap();
    assert_eq!(object.metadata, metadata);
}

#[test]
fn extract_filter_textures() {
    let dir = tempfile::tempdir().unwrap();
    write_capture(dir.path(), LOG);

    let filter = TextureFilter {
        min_file_size: 16,
        exclude_extensions: Vec::new(),
        exclude_same_slot_hash_textures: true,
    };
    let objects = migoto_model::extract(dir.path(), &Configuration::default(), &filter).unwrap();

    let object = &objects["0000aaaa"];
    assert!(object.components[0].textures.is_empty());
    // The second texture is below the minimum size.
    assert!(object.components[1].textures.is_empty());
    assert!(object.texture_files().is_empty());
}

#[test]
fn extract_missing_draw_parameters() {
    let dir = tempfile::tempdir().unwrap();
    write_capture(
        dir.path(),
        indoc! {"
            000001 DrawIndexed(IndexCount:6, StartIndexLocation:0, BaseVertexLocation:0)
        "},
    );

    let result = migoto_model::extract(
        dir.path(),
        &Configuration::default(),
        &TextureFilter::default(),
    );
    assert!(matches!(
        result,
        Err(ExtractError::MissingCallParameters {
            call_id: 2,
            name: "DrawIndexed"
        })
    ));
}

#[test]
fn extract_missing_log() {
    let dir = tempfile::tempdir().unwrap();
    let result = migoto_model::extract(
        dir.path(),
        &Configuration::default(),
        &TextureFilter::default(),
    );
    assert!(matches!(result, Err(ExtractError::Dump(_))));
}

#[test]
fn extract_split_draw_different_skeleton() {
    let dir = tempfile::tempdir().unwrap();
    write_capture(dir.path(), LOG);
    // Both draws now use the same vertex range with different skeletons.
    write(dir.path(), 2, "ib=0000bbbb", "txt", index_text(0, "0 1 2\n2 1 3\n").as_bytes());

    let result = migoto_model::extract(
        dir.path(),
        &Configuration::default(),
        &TextureFilter::default(),
    );
    assert!(
        matches!(&result, Err(ExtractError::InconsistentCapture(message)) if message.contains("skeleton")),
        "{result:?}"
    );
}

#[test]
fn extract_split_draw_different_index_buffer() {
    let dir = tempfile::tempdir().unwrap();
    write_capture(dir.path(), LOG);
    for ext in ["buf", "txt"] {
        std::fs::remove_file(dir.path().join(format!("000002-ib=0000bbbb-{SHADERS}.{ext}"))).unwrap();
    }
    write(dir.path(), 2, "ib=0000beef", "buf", &[0u8; 12]);
    write(dir.path(), 2, "ib=0000beef", "txt", index_text(0, "0 1 2\n2 1 3\n").as_bytes());

    let result = migoto_model::extract(
        dir.path(),
        &Configuration::default(),
        &TextureFilter::default(),
    );
    assert!(
        matches!(&result, Err(ExtractError::InconsistentCapture(message)) if message.contains("index buffer")),
        "{result:?}"
    );
}

#[test]
fn extract_shapekeys() {
    let dir = tempfile::tempdir().unwrap();
    write_shapekey_capture(dir.path(), &[("cs=c1c1c1c1", 2)]);

    let objects = migoto_model::extract(
        dir.path(),
        &Configuration::default(),
        &TextureFilter::default(),
    )
    .unwrap();
    let object = &objects["0000aaaa"];

    assert_eq!(
        ShapeKeyMetadata {
            offsets_hash: OFFSETS_HASH.into(),
            scale_hash: SCALE_HASH.into(),
            vertex_count: 3,
            dispatch_y: 2,
            checksum: 7,
        },
        object.metadata.shapekeys
    );

    let [c0, c1] = object.components.as_slice() else {
        panic!("expected 2 components")
    };

    // Each component only has the shape keys affecting its vertices.
    let shapekey = |index| AbstractSemantic::new(Semantic::ShapeKey, index);
    assert_eq!(54, c0.fmt.stride);
    assert!(c0.fmt.layout.get(&shapekey(2)).is_none());
    assert!(c1.fmt.layout.get(&shapekey(0)).is_none());
    assert!(
        c0.fmt.to_string().contains(
            "element[10]:\n  SemanticName: SHAPEKEY\n  SemanticIndex: 0\n  Format: R16G16B16_FLOAT\n  InputSlot: 0\n  AlignedByteOffset: 48\n"
        ),
        "{}",
        c0.fmt
    );
    assert!(c1.fmt.to_string().contains("SemanticName: SHAPEKEY\n  SemanticIndex: 2\n"));

    assert_eq!(
        vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.5, 0.0, 0.0, 0.0, 0.0],
        component_values(&c0.vb, &c0.fmt, shapekey(0))
    );
    assert_eq!(
        vec![0.0, 0.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        component_values(&c1.vb, &c1.fmt, shapekey(2))
    );

    // Shape key fields parse back from the descriptor.
    let fmt: VertexFormat = c0.fmt.to_string().parse().unwrap();
    assert_eq!(c0.fmt, fmt);
}

#[test]
fn extract_shapekeys_different_shader() {
    let dir = tempfile::tempdir().unwrap();
    write_shapekey_capture(dir.path(), &[("cs=c1c1c1c1", 2), ("cs=c9c9c9c9", 2)]);

    let result = migoto_model::extract(
        dir.path(),
        &Configuration::default(),
        &TextureFilter::default(),
    );
    assert!(
        matches!(&result, Err(ExtractError::InconsistentCapture(message)) if message.contains("shader hash")),
        "{result:?}"
    );
}

#[test]
fn extract_shapekeys_different_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    write_shapekey_capture(dir.path(), &[("cs=c1c1c1c1", 2), ("cs=c1c1c1c1", 3)]);

    let result = migoto_model::extract(
        dir.path(),
        &Configuration::default(),
        &TextureFilter::default(),
    );
    assert!(
        matches!(&result, Err(ExtractError::InconsistentCapture(message)) if message.contains("dispatch y")),
        "{result:?}"
    );
}
