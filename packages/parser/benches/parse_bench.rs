use criterion::{black_box, criterion_group, criterion_main, Criterion};
use casedict_parser::parse;

fn parse_control_dict(c: &mut Criterion) {
    let source = r#"
FoamFile
{
    version     2.0;
    format      ascii;
    class       dictionary;
}

startFrom       startTime;
stopAt          endTime;
deltaT          0.005;
writeInterval   20;
"#;

    c.bench_function("parse_control_dict", |b| {
        b.iter(|| parse(black_box(source)))
    });
}

fn parse_mesh_dict(c: &mut Criterion) {
    let source = r#"
vertices
(
    ( 0 0 0 )
    ( 1 0 0 )
    ( 1 1 0 )
    ( 0 1 0 )
);

blocks
(
    hex (0 1 2 3 4 5 6 7) (10 10 1) simpleGrading (1 1 1)
    hex (8 9 10 11 12 13 14 15) (20 20 1) simpleGrading (2 2 1)
);

regions
(
    fluid   (region1 region2)
    solid   (region3)
);

actions
(
    {
        name        action1;
        type        faceZoneSet;
        faceSet     faces1;
    }
    {
        name        action2;
        type        cellZoneSet;
        faceSet     faces2;
    }
);
"#;

    c.bench_function("parse_mesh_dict", |b| {
        b.iter(|| parse(black_box(source)))
    });
}

fn parse_large_boundary_file(c: &mut Criterion) {
    // Simulate a large boundary file with many named patch records.
    let mut source = String::from("boundary\n(\n");
    for i in 0..200 {
        source.push_str(&format!(
            "    patch{}\n    {{\n        type        patch;\n        nFaces      {};\n        startFace   {};\n    }}\n",
            i,
            i * 10,
            i * 100
        ));
    }
    source.push_str(");\n");

    c.bench_function("parse_large_boundary_file", |b| {
        b.iter(|| parse(black_box(&source)))
    });
}

fn tokenize_only(c: &mut Criterion) {
    use casedict_parser::tokenize;

    let source = r#"
outlet
{
    type        patch;      // patch type
    inGroups    2(wall patch);
}
"#;

    c.bench_function("tokenize_only", |b| {
        b.iter(|| tokenize(black_box(source)))
    });
}

criterion_group!(
    benches,
    parse_control_dict,
    parse_mesh_dict,
    parse_large_boundary_file,
    tokenize_only
);
criterion_main!(benches);
