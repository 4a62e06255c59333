//! Document-level tests: nested repeat-group interleaving, virtual
//! roots, hooks, metadata columns, row numbers and the storage batch
//! contract.

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use pretty_assertions::assert_eq;

use xml_tabular::{
    DataModel, DataType, MetadataColumn, ModelConfig, ParseOptions, Value, XmlConverter,
};

mod nested_groups {
    use super::*;
    use pretty_assertions::assert_eq;

    const LOG_XSD: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="log">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="title" type="xs:string"/>
        <xs:sequence maxOccurs="unbounded">
          <xs:element name="time" type="xs:string"/>
          <xs:element name="event" type="xs:string"/>
        </xs:sequence>
      </xs:sequence>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;

    const LOG_DOC: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
<log>\n\
  <title>boot</title>\n\
  <time>t1</time>\n\
  <event>start</event>\n\
  <time>t2</time>\n\
  <event>ready</event>\n\
</log>\n";

    #[test]
    fn test_repeating_sequence_keeps_sibling_interleaving() {
        let model = DataModel::from_xsd_str(LOG_XSD, Some("log"), ModelConfig::default()).unwrap();

        // both columns of the nested sequence share one ngroup tag
        let log = &model.tables["log"];
        let time = log.column("time").unwrap();
        let event = log.column("event").unwrap();
        assert!(time.ngroup.is_some());
        assert_eq!(time.ngroup, event.ngroup);
        assert_eq!(log.column("title").unwrap().ngroup, None);

        // values are stored joined, but the XML comes back interleaved
        // (time, event, time, event) rather than grouped
        let doc = model
            .parse_xml_bytes(LOG_DOC.as_bytes(), None, &ParseOptions::default())
            .unwrap();
        let record = &doc.data.tables["log"].records[0];
        assert_eq!(record["time"], Value::Str("t1,t2".to_string()));
        assert_eq!(record["event"], Value::Str("start,ready".to_string()));

        let output = doc.to_xml_string(None, "  ").unwrap();
        assert_eq!(output, LOG_DOC);
    }
}

mod virtual_root {
    use super::*;
    use pretty_assertions::assert_eq;

    const PROTOCOL_XSD: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="ping">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="msg" type="xs:string"/>
      </xs:sequence>
    </xs:complexType>
  </xs:element>
  <xs:element name="pong">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="msg" type="xs:string"/>
      </xs:sequence>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;

    const PONG_DOC: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
<pong>\n\
  <msg>yo</msg>\n\
</pong>\n";

    #[test]
    fn test_multiple_root_elements_share_a_wrapper_table() {
        let model =
            DataModel::from_xsd_str(PROTOCOL_XSD, Some("protocol"), ModelConfig::default())
                .unwrap();
        let root = model.root();
        assert!(root.is_virtual_node);
        let fields: Vec<&str> = root.fields.iter().map(|f| f.name()).collect();
        assert_eq!(fields, vec!["ping_msg", "pong_msg"]);

        let doc = model
            .parse_xml_bytes(PONG_DOC.as_bytes(), None, &ParseOptions::default())
            .unwrap();
        let record = &doc.data.tables["protocol"].records[0];
        assert_eq!(record["pong_msg"], Value::Str("yo".to_string()));
        assert_eq!(record["ping_msg"], Value::Null);

        // the wrapper is unwrapped again on output
        let output = doc.to_xml_string(None, "  ").unwrap();
        assert_eq!(output, PONG_DOC);
    }

    #[test]
    fn test_virtual_root_parsing_strategies_agree() {
        let model =
            DataModel::from_xsd_str(PROTOCOL_XSD, Some("protocol"), ModelConfig::default())
                .unwrap();
        let mut converter = XmlConverter::new(&model);
        let iterative = converter
            .parse_reader(
                PONG_DOC.as_bytes(),
                &ParseOptions {
                    iterparse: true,
                    ..Default::default()
                },
            )
            .unwrap();
        let recursive = converter
            .parse_reader(
                PONG_DOC.as_bytes(),
                &ParseOptions {
                    iterparse: false,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(iterative, recursive);
    }
}

mod hooks {
    use super::*;
    use pretty_assertions::assert_eq;

    const SET_XSD: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:complexType name="EntryType">
    <xs:sequence>
      <xs:element name="k" type="xs:string"/>
    </xs:sequence>
  </xs:complexType>
  <xs:element name="set">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="entry" type="EntryType" maxOccurs="unbounded"/>
      </xs:sequence>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;

    #[test]
    fn test_node_hook_can_drop_nodes() {
        let mut config = ModelConfig::default();
        config.hooks.document_tree_node = Some(Rc::new(|node| {
            let is_drop = node.type_name == "EntryType"
                && node.content.values("k").map(|v| v == ["drop"]) == Some(true);
            if is_drop {
                None
            } else {
                Some(node)
            }
        }));
        let model = DataModel::from_xsd_str(SET_XSD, Some("set"), config).unwrap();
        let doc = model
            .parse_xml_bytes(
                b"<set>\
                    <entry><k>x</k></entry>\
                    <entry><k>drop</k></entry>\
                    <entry><k>drop</k></entry>\
                    <entry><k>y</k></entry>\
                  </set>",
                None,
                &ParseOptions::default(),
            )
            .unwrap();
        // dropped once, dropped every time: the registry remembers the
        // hook's verdict per content hash
        assert_eq!(doc.data.tables["EntryType"].records.len(), 2);
        assert_eq!(
            doc.data.tables["set"].relations["set_entry"].len(),
            2
        );
    }

    #[test]
    fn test_tree_hook_runs_once_per_document() {
        let called = Rc::new(Cell::new(0u32));
        let counter = called.clone();
        let mut config = ModelConfig::default();
        config.hooks.document_tree = Some(Rc::new(move |tree| {
            counter.set(counter.get() + 1);
            tree
        }));
        let model = DataModel::from_xsd_str(SET_XSD, Some("set"), config).unwrap();
        model
            .parse_xml_bytes(
                b"<set><entry><k>x</k></entry></set>",
                None,
                &ParseOptions::default(),
            )
            .unwrap();
        assert_eq!(called.get(), 1);
    }
}

mod storage_contract {
    use super::*;
    use pretty_assertions::assert_eq;

    const MANIFEST_XSD: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:complexType name="ItemType">
    <xs:sequence>
      <xs:element name="sku" type="xs:string"/>
      <xs:element name="qty" type="xs:integer"/>
    </xs:sequence>
  </xs:complexType>
  <xs:complexType name="ShipmentType">
    <xs:sequence>
      <xs:element name="reference" type="xs:string"/>
      <xs:element name="item" type="ItemType" maxOccurs="unbounded"/>
    </xs:sequence>
  </xs:complexType>
  <xs:element name="manifest">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="shipment" type="ShipmentType" maxOccurs="unbounded"/>
      </xs:sequence>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;

    const MANIFEST_DOC: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
<manifest>\n\
  <shipment>\n\
    <reference>R-1</reference>\n\
    <item>\n\
      <sku>A</sku>\n\
      <qty>5</qty>\n\
    </item>\n\
    <item>\n\
      <sku>B</sku>\n\
      <qty>2</qty>\n\
    </item>\n\
  </shipment>\n\
  <shipment>\n\
    <reference>R-2</reference>\n\
    <item>\n\
      <sku>A</sku>\n\
      <qty>5</qty>\n\
    </item>\n\
  </shipment>\n\
</manifest>\n";

    #[test]
    fn test_insert_batches_follow_dependency_order() {
        let model =
            DataModel::from_xsd_str(MANIFEST_XSD, Some("manifest"), ModelConfig::default())
                .unwrap();
        let doc = model
            .parse_xml_bytes(MANIFEST_DOC.as_bytes(), None, &ParseOptions::default())
            .unwrap();

        let batches = doc.insert_batches();
        let names: Vec<&str> = batches.iter().map(|b| b.table.name.as_str()).collect();
        assert_eq!(names, vec!["item", "shipment", "manifest"]);
        assert_eq!(batches[0].records.len(), 2); // deduplicated items
        assert_eq!(batches[1].records.len(), 2);
        assert_eq!(batches[2].records.len(), 1);

        // join batches ride with the owning table
        assert_eq!(batches[1].relations.len(), 1);
        let (join_name, rows) = &batches[1].relations[0];
        assert_eq!(*join_name, "shipment_item");
        assert_eq!(rows.len(), 3);

        let delete_order: Vec<&str> =
            doc.delete_order().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(delete_order, vec!["manifest", "shipment", "item"]);
    }

    #[test]
    fn test_integer_coercion_and_record_hash() {
        let model =
            DataModel::from_xsd_str(MANIFEST_XSD, Some("manifest"), ModelConfig::default())
                .unwrap();
        let doc = model
            .parse_xml_bytes(MANIFEST_DOC.as_bytes(), None, &ParseOptions::default())
            .unwrap();
        let items = &doc.data.tables["ItemType"];
        let a = items
            .records
            .iter()
            .find(|r| r.get("sku") == Some(&Value::Str("A".to_string())))
            .unwrap();
        assert_eq!(a["qty"], Value::Int(5));
        // every record carries its content hash under the configured
        // column name
        let hash = a["xtab_record_hash"].as_bytes().unwrap();
        assert_eq!(hash.len(), 32);
        assert!(items.hash_index.contains_key(hash));
    }

    #[test]
    fn test_row_numbers_option() {
        let config: ModelConfig = serde_json::from_str(
            r#"{"row_numbers": true, "tables": {"shipment": {"reuse": false}}}"#,
        )
        .unwrap();
        let model = DataModel::from_xsd_str(MANIFEST_XSD, Some("manifest"), config).unwrap();
        let doc = model
            .parse_xml_bytes(MANIFEST_DOC.as_bytes(), None, &ParseOptions::default())
            .unwrap();

        // duplicated table records carry their ordinal position
        let shipments = &doc.data.tables["ShipmentType"];
        let rows: Vec<i64> = shipments
            .records
            .iter()
            .map(|r| r["xtab_row_number"].as_int().unwrap())
            .collect();
        assert_eq!(rows, vec![1, 2]);

        // join rows to reused targets carry one as well
        let join_rows = &shipments.relations["shipment_item"];
        let rows: Vec<i64> = join_rows
            .iter()
            .map(|r| r["xtab_row_number"].as_int().unwrap())
            .collect();
        assert_eq!(rows, vec![1, 2, 1]);
    }

    #[test]
    fn test_metadata_columns_fill_the_root_record() {
        let mut config = ModelConfig::default();
        config.metadata_columns = vec![MetadataColumn {
            name: "input_file_path".to_string(),
            data_type: DataType::String,
        }];
        let model = DataModel::from_xsd_str(MANIFEST_XSD, Some("manifest"), config).unwrap();
        let mut doc = model
            .parse_xml_bytes(MANIFEST_DOC.as_bytes(), None, &ParseOptions::default())
            .unwrap();
        doc.set_metadata(&HashMap::from([(
            "input_file_path".to_string(),
            Value::Str("batch-1.xml".to_string()),
        )]));
        let record = &doc.data.tables["manifest"].records[0];
        assert_eq!(
            record["input_file_path"],
            Value::Str("batch-1.xml".to_string())
        );
        // unknown keys are not copied
        assert!(!record.contains_key("something_else"));
    }

    #[test]
    fn test_parse_from_file_records_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.xml");
        std::fs::write(&path, MANIFEST_DOC).unwrap();

        let model =
            DataModel::from_xsd_str(MANIFEST_XSD, Some("manifest"), ModelConfig::default())
                .unwrap();
        let doc = model
            .parse_xml_file(&path, &ParseOptions::default())
            .unwrap();
        let record = &doc.data.tables["manifest"].records[0];
        assert_eq!(
            record["xtab_input_file_path"],
            Value::Str(path.display().to_string())
        );
        assert_eq!(doc.to_xml_string(None, "  ").unwrap(), MANIFEST_DOC);
    }

    #[test]
    fn test_document_summary() {
        let model =
            DataModel::from_xsd_str(MANIFEST_XSD, Some("manifest"), ModelConfig::default())
                .unwrap();
        let doc = model
            .parse_xml_bytes(MANIFEST_DOC.as_bytes(), None, &ParseOptions::default())
            .unwrap();
        let summary = doc.to_string();
        assert!(summary.contains("5 records"));
        assert!(summary.contains("   item: 2"));
        assert!(summary.contains("   shipment: 2"));
    }

    #[test]
    fn test_model_tree_renderings() {
        let model =
            DataModel::from_xsd_str(MANIFEST_XSD, Some("manifest"), ModelConfig::default())
                .unwrap();
        // before simplification the shipment child is a relation
        assert!(model.source_tree.contains("shipment[1, n]:"));
        assert!(model.source_tree.contains("reference[1, 1]: string"));
        // the simplified tree still shows the kept relations
        assert!(model.target_tree.contains("item[1, n]:"));
        assert!(model.target_tree.contains("qty[1, 1]: integer"));
    }
}
