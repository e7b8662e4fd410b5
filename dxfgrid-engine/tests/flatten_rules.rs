use dxfgrid_core::document::{BlockDefinition, Document, Entity, LayoutKind};
use dxfgrid_core::geometry::{Point2, Point3};
use dxfgrid_engine::flatten::{FlattenContext, FlattenOptions, flatten, flatten_with};
use dxfgrid_engine::save_flat_csv;
use dxfgrid_io::DxfFacade;

fn origin() -> Point3 {
    Point3::new(0.0, 0.0, 0.0)
}

#[test]
fn module_ids_ignore_layer_while_group_ids_do_not() {
    let mut context = FlattenContext::new();
    let module = context.module_id("2F");
    assert_eq!(context.module_id("2F"), module);
    assert_ne!(context.module_id("30"), module);

    let on_walls = context.group_id("WALL", "2F");
    let on_axes = context.group_id("AXIS", "2F");
    assert_ne!(on_walls, on_axes);
    assert_eq!(context.group_id("WALL", "2F"), on_walls);
}

#[test]
fn block_children_on_different_layers_share_the_insert_module() {
    let mut doc = Document::new();
    doc.add_block_definition(
        BlockDefinition::new("PILE", origin())
            .with_entity(Entity::circle("PILE", origin(), 0.4))
            .with_entity(Entity::text("TEXT", origin(), "Z1", 0.3))
            .with_entity(Entity::lwpolyline(
                "HATCH",
                [Point2::new(0.0, 0.0), Point2::new(1.0, 0.0), Point2::new(1.0, 1.0)],
                true,
            )),
    );
    doc.add_entity(Entity::insert("0", "PILE", Point3::new(5.0, 5.0, 0.0)).with_handle("A0"));
    doc.add_entity(Entity::insert("0", "PILE", Point3::new(9.0, 5.0, 0.0)).with_handle("A1"));

    let rows = flatten(&doc);
    let first: Vec<_> = rows.iter().filter(|row| row.module_id == Some(1)).collect();
    let second: Vec<_> = rows.iter().filter(|row| row.module_id == Some(2)).collect();
    assert_eq!(first.len(), second.len());
    assert_eq!(first.len() + second.len(), rows.len());

    let layers: Vec<&str> = first.iter().map(|row| row.layer.as_str()).collect();
    assert_eq!(layers, ["0", "PILE", "TEXT", "HATCH", "HATCH", "HATCH"]);
    assert!(first.iter().all(|row| row.module_name == "PILE"));

    // 两个实例的多段线各自成组
    let polyline_group = |rows: &[&dxfgrid_engine::FlatRow]| {
        rows.iter()
            .find(|row| row.subclass == "LWPOLYLINE")
            .and_then(|row| row.group_id)
    };
    assert_ne!(polyline_group(&first), polyline_group(&second));
}

#[test]
fn self_referencing_block_terminates() {
    let mut doc = Document::new();
    doc.add_block_definition(
        BlockDefinition::new("SELF", origin())
            .with_entity(Entity::line("0", origin(), Point3::new(1.0, 0.0, 0.0)))
            .with_entity(Entity::insert("0", "SELF", Point3::new(0.0, 2.0, 0.0))),
    );
    doc.add_entity(Entity::insert("0", "SELF", origin()));

    let flattened = flatten_with(&doc, FlattenOptions::default());
    // 每层一个 LINE 和一个 INSERT，第 10 层的 INSERT 不再展开
    assert_eq!(flattened.rows.len(), 1 + 10 * 2);
    assert_eq!(flattened.report.depth_limited, 1);
    assert_eq!(flattened.report.expanded_inserts, 10);
}

#[test]
fn every_top_level_entity_yields_at_least_one_row() {
    let mut doc = Document::new();
    doc.add_entity(Entity::line("0", origin(), Point3::new(3.0, 4.0, 0.0)));
    doc.add_entity(Entity::circle("0", Point3::new(1.0, 1.0, 0.0), 2.0));
    doc.add_entity(Entity::text("TEXT", Point3::new(2.0, 2.0, 0.0), "标注", 1.0));
    doc.add_entity(Entity::generic("WIPEOUT", "0"));
    doc.add_entity(Entity::insert("0", "MISSING", origin()));
    let paper = doc.ensure_layout("Layout1", LayoutKind::Paper);
    doc.add_entity_to(paper, Entity::point("0", origin()));

    let flattened = flatten_with(&doc, FlattenOptions::default());
    assert_eq!(flattened.report.entities, 6);
    assert_eq!(flattened.rows.len(), 6);
    assert_eq!(flattened.report.placeholders, 1);
    assert_eq!(flattened.rows[5].space, "Layout1");
    assert!(flattened.rows.iter().all(|row| row.module_id.is_some()));
}

#[test]
fn parsed_document_flattens_to_csv() {
    let source = [
        "0", "SECTION", "2", "ENTITIES",
        "0", "LINE", "5", "1A", "8", "AXIS", "10", "0", "20", "0", "11", "10", "21", "0",
        "0", "TEXT", "5", "1B", "8", "TEXT", "10", "1", "20", "1", "40", "2.5", "1", "A,B",
        "0", "ENDSEC", "0", "EOF",
    ]
    .join("\n");
    let doc = DxfFacade::new().parse_str(&source).expect("parse");
    let rows = flatten(&doc);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].handle, "1A");
    assert_eq!(rows[0].end, Some([10.0, 0.0, 0.0]));
    assert_eq!(rows[1].text, "A,B");

    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("flat.csv");
    save_flat_csv(&path, &rows).expect("write csv");
    let written = std::fs::read_to_string(&path).expect("read csv");
    assert_eq!(written.lines().count(), 3);
    assert!(written.contains("\"A,B\""));
}
