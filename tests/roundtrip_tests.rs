//! Round-trip tests over a shipping-manifest schema exercising
//! elevation, choice collapsing, value joining and deduplication.

use pretty_assertions::assert_eq;

use xml_tabular::{DataModel, ModelConfig, ParseOptions, XmlConverter};

const MANIFEST_XSD: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:complexType name="PartyType">
    <xs:sequence>
      <xs:element name="name" type="xs:string"/>
      <xs:element name="code" type="xs:string" minOccurs="0"/>
    </xs:sequence>
  </xs:complexType>
  <xs:complexType name="NoteType">
    <xs:simpleContent>
      <xs:extension base="xs:string">
        <xs:attribute name="lang" type="xs:string"/>
      </xs:extension>
    </xs:simpleContent>
  </xs:complexType>
  <xs:complexType name="QuantityType">
    <xs:choice>
      <xs:element name="units" type="xs:string"/>
      <xs:element name="pallets" type="xs:string"/>
      <xs:element name="crates" type="xs:string"/>
    </xs:choice>
  </xs:complexType>
  <xs:complexType name="ItemType">
    <xs:sequence>
      <xs:element name="sku" type="xs:string"/>
      <xs:element name="quantity" type="QuantityType"/>
      <xs:element name="price" type="xs:decimal" minOccurs="0"/>
      <xs:element name="tag" type="xs:string" minOccurs="0" maxOccurs="3"/>
    </xs:sequence>
  </xs:complexType>
  <xs:complexType name="ShipmentType">
    <xs:sequence>
      <xs:element name="reference" type="xs:string"/>
      <xs:element name="sender" type="PartyType"/>
      <xs:element name="note" type="NoteType" minOccurs="0"/>
      <xs:element name="item" type="ItemType" maxOccurs="unbounded"/>
    </xs:sequence>
    <xs:attribute name="id" type="xs:string"/>
  </xs:complexType>
  <xs:element name="manifest">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="created" type="xs:string"/>
        <xs:element name="shipment" type="ShipmentType" maxOccurs="unbounded"/>
      </xs:sequence>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;

const MANIFEST_DOC: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
<manifest>\n\
  <created>2024-03-01</created>\n\
  <shipment id=\"S1\">\n\
    <reference>R-100</reference>\n\
    <sender>\n\
      <name>Acme Industrial</name>\n\
      <code>ACME</code>\n\
    </sender>\n\
    <note lang=\"en\">Fragile goods</note>\n\
    <item>\n\
      <sku>BOLT-7</sku>\n\
      <quantity>\n\
        <units>500</units>\n\
      </quantity>\n\
      <price>19.9</price>\n\
      <tag>fasteners</tag>\n\
      <tag>steel</tag>\n\
    </item>\n\
    <item>\n\
      <sku>PLATE-2</sku>\n\
      <quantity>\n\
        <pallets>3</pallets>\n\
      </quantity>\n\
    </item>\n\
  </shipment>\n\
  <shipment id=\"S2\">\n\
    <reference>R-101</reference>\n\
    <sender>\n\
      <name>Nordic Parts</name>\n\
    </sender>\n\
    <item>\n\
      <sku>BOLT-7</sku>\n\
      <quantity>\n\
        <units>500</units>\n\
      </quantity>\n\
      <price>19.9</price>\n\
      <tag>fasteners</tag>\n\
      <tag>steel</tag>\n\
    </item>\n\
  </shipment>\n\
</manifest>\n";

fn manifest_model() -> DataModel {
    DataModel::from_xsd_str(MANIFEST_XSD, Some("manifest"), ModelConfig::default()).unwrap()
}

mod simplification {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_manifest_model_shape() {
        let model = manifest_model();

        // sender, note and quantity were merged away; item and shipment
        // survive
        let tables: Vec<&str> = model.tables.keys().map(String::as_str).collect();
        assert_eq!(tables, vec!["ItemType", "ShipmentType", "manifest"]);

        let shipment = &model.tables["ShipmentType"];
        let fields: Vec<&str> = shipment.fields.iter().map(|f| f.name()).collect();
        assert_eq!(
            fields,
            vec![
                "id",
                "reference",
                "sender_name",
                "sender_code",
                "note_lang",
                "note_value",
                "item"
            ]
        );

        let item = &model.tables["ItemType"];
        let fields: Vec<&str> = item.fields.iter().map(|f| f.name()).collect();
        assert_eq!(
            fields,
            vec!["sku", "quantity_type", "quantity_value", "price", "tag"]
        );
    }

    #[test]
    fn test_insert_order() {
        let model = manifest_model();
        let order: Vec<&str> = model.ordered_tables().map(|t| t.name.as_str()).collect();
        assert_eq!(order, vec!["item", "shipment", "manifest"]);
        let reversed: Vec<&str> = model
            .ordered_tables_reversed()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(reversed, vec!["manifest", "shipment", "item"]);
    }
}

mod roundtrip {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_xml_roundtrip_is_byte_exact() {
        let model = manifest_model();
        let doc = model
            .parse_xml_bytes(MANIFEST_DOC.as_bytes(), None, &ParseOptions::default())
            .unwrap();
        let output = doc.to_xml_string(None, "  ").unwrap();
        assert_eq!(output, MANIFEST_DOC);
    }

    #[test]
    fn test_xml_roundtrip_with_kept_relation() {
        // keeping the sender relation produces the same bytes through
        // the relational path
        let config: ModelConfig = serde_json::from_str(
            r#"{"tables": {"shipment": {"fields": {"sender": {"transform": "disabled"}}}}}"#,
        )
        .unwrap();
        let model = DataModel::from_xsd_str(MANIFEST_XSD, Some("manifest"), config).unwrap();
        assert!(model.tables.contains_key("PartyType"));

        let doc = model
            .parse_xml_bytes(MANIFEST_DOC.as_bytes(), None, &ParseOptions::default())
            .unwrap();
        // one sender record per distinct sender
        assert_eq!(doc.data.tables["PartyType"].records.len(), 2);
        let output = doc.to_xml_string(None, "  ").unwrap();
        assert_eq!(output, MANIFEST_DOC);
    }

    #[test]
    fn test_flatten_unflatten_inverse() {
        let model = manifest_model();
        let mut converter = XmlConverter::new(&model);
        let parsed = converter
            .parse_reader(MANIFEST_DOC.as_bytes(), &ParseOptions::default())
            .unwrap();

        let doc = model
            .parse_xml_bytes(MANIFEST_DOC.as_bytes(), None, &ParseOptions::default())
            .unwrap();
        let rebuilt = doc.flat_data_to_doc_tree().unwrap();

        assert_eq!(rebuilt.without_hashes(), parsed.without_hashes());
    }

    #[test]
    fn test_iterative_and_recursive_parsing_agree() {
        let model = manifest_model();
        let mut converter = XmlConverter::new(&model);
        let iterative = converter
            .parse_reader(
                MANIFEST_DOC.as_bytes(),
                &ParseOptions {
                    iterparse: true,
                    ..Default::default()
                },
            )
            .unwrap();
        let recursive = converter
            .parse_reader(
                MANIFEST_DOC.as_bytes(),
                &ParseOptions {
                    iterparse: false,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(iterative, recursive);
    }

    #[test]
    fn test_elevated_relation_roundtrip() {
        // the lone mandatory child is elevated without a prefix, pulling
        // its multi relation up with it
        let xsd = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:complexType name="PartType">
    <xs:sequence>
      <xs:element name="serial" type="xs:string"/>
    </xs:sequence>
  </xs:complexType>
  <xs:complexType name="BundleType">
    <xs:sequence>
      <xs:element name="label" type="xs:string"/>
      <xs:element name="part" type="PartType" maxOccurs="unbounded"/>
    </xs:sequence>
  </xs:complexType>
  <xs:element name="box">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="bundle" type="BundleType"/>
      </xs:sequence>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;
        let model = DataModel::from_xsd_str(xsd, Some("box"), ModelConfig::default()).unwrap();

        let box_table = &model.tables["box"];
        let fields: Vec<&str> = box_table.fields.iter().map(|f| f.name()).collect();
        assert_eq!(fields, vec!["label", "part"]);
        assert!(model.tables.contains_key("PartType"));
        assert!(!model.tables.contains_key("BundleType"));

        let input = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
<box>\n\
  <bundle>\n\
    <label>tools</label>\n\
    <part>\n\
      <serial>A1</serial>\n\
    </part>\n\
    <part>\n\
      <serial>B2</serial>\n\
    </part>\n\
  </bundle>\n\
</box>\n";
        let doc = model
            .parse_xml_bytes(input.as_bytes(), None, &ParseOptions::default())
            .unwrap();
        assert_eq!(doc.data.tables["PartType"].records.len(), 2);
        assert_eq!(doc.data.tables["box"].relations["box_part"].len(), 2);
        assert_eq!(doc.to_xml_string(None, "  ").unwrap(), input);
    }

    #[test]
    fn test_roundtrip_through_duplicated_table() {
        let config: ModelConfig =
            serde_json::from_str(r#"{"tables": {"shipment": {"reuse": false}}}"#).unwrap();
        let model = DataModel::from_xsd_str(MANIFEST_XSD, Some("manifest"), config).unwrap();

        let doc = model
            .parse_xml_bytes(MANIFEST_DOC.as_bytes(), None, &ParseOptions::default())
            .unwrap();
        // duplicated shipments carry a parent back-reference instead of
        // join-table rows
        let shipments = &doc.data.tables["ShipmentType"];
        assert!(shipments.records[0].contains_key("temp_fk_parent_manifest"));
        assert!(doc.data.tables["manifest"].relations.is_empty());

        let output = doc.to_xml_string(None, "  ").unwrap();
        assert_eq!(output, MANIFEST_DOC);
    }
}

mod deduplication {
    use super::*;
    use pretty_assertions::assert_eq;
    use xml_tabular::Value;

    #[test]
    fn test_identical_subtrees_share_one_record() {
        let model = manifest_model();
        let doc = model
            .parse_xml_bytes(MANIFEST_DOC.as_bytes(), None, &ParseOptions::default())
            .unwrap();

        // BOLT-7 appears in both shipments but is stored once
        let items = &doc.data.tables["ItemType"];
        assert_eq!(items.records.len(), 2);

        let join_rows = &doc.data.tables["ShipmentType"].relations["shipment_item"];
        assert_eq!(join_rows.len(), 3);
        let pairs: Vec<(i64, i64)> = join_rows
            .iter()
            .map(|row| {
                (
                    row["temp_fk_shipment"].as_int().unwrap(),
                    row["temp_fk_item"].as_int().unwrap(),
                )
            })
            .collect();
        assert_eq!(pairs, vec![(1, 1), (1, 2), (2, 1)]);
    }

    #[test]
    fn test_joined_values_are_stored_as_csv() {
        let model = manifest_model();
        let doc = model
            .parse_xml_bytes(MANIFEST_DOC.as_bytes(), None, &ParseOptions::default())
            .unwrap();
        let items = &doc.data.tables["ItemType"];
        let bolt = items
            .records
            .iter()
            .find(|r| r.get("sku") == Some(&Value::Str("BOLT-7".to_string())))
            .unwrap();
        assert_eq!(bolt["tag"], Value::Str("fasteners,steel".to_string()));
        assert_eq!(bolt["price"], Value::Float(19.9));
        assert_eq!(bolt["quantity_type"], Value::Str("units".to_string()));
        assert_eq!(bolt["quantity_value"], Value::Str("500".to_string()));
    }

    #[test]
    fn test_hash_is_order_independent_for_repeated_children() {
        let xsd = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
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
        let model = DataModel::from_xsd_str(xsd, Some("set"), ModelConfig::default()).unwrap();
        let mut converter = XmlConverter::new(&model);
        let forward = converter
            .parse_reader(
                b"<set><entry><k>x</k></entry><entry><k>y</k></entry></set>".as_slice(),
                &ParseOptions::default(),
            )
            .unwrap();
        let backward = converter
            .parse_reader(
                b"<set><entry><k>y</k></entry><entry><k>x</k></entry></set>".as_slice(),
                &ParseOptions::default(),
            )
            .unwrap();
        assert_eq!(forward.hash, backward.hash);
    }
}

mod csv_joining {
    use super::*;
    use pretty_assertions::assert_eq;
    use xml_tabular::Value;

    const CSV_XSD: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="doc">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="v" type="xs:string" minOccurs="0" maxOccurs="3"/>
      </xs:sequence>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;

    const CSV_DOC: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
<doc>\n\
  <v>a</v>\n\
  <v>b,c</v>\n\
  <v>d</v>\n\
</doc>\n";

    #[test]
    fn test_values_with_commas_are_quoted() {
        let model = DataModel::from_xsd_str(CSV_XSD, Some("doc"), ModelConfig::default()).unwrap();
        let doc = model
            .parse_xml_bytes(CSV_DOC.as_bytes(), None, &ParseOptions::default())
            .unwrap();
        let record = &doc.data.tables["doc"].records[0];
        assert_eq!(record["v"], Value::Str("a,\"b,c\",d".to_string()));

        // and the joined string splits back into the original values
        let output = doc.to_xml_string(None, "  ").unwrap();
        assert_eq!(output, CSV_DOC);
    }

    #[test]
    fn test_single_value_with_comma_roundtrips() {
        let model = DataModel::from_xsd_str(CSV_XSD, Some("doc"), ModelConfig::default()).unwrap();
        let input = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
<doc>\n\
  <v>only,one</v>\n\
</doc>\n";
        let doc = model
            .parse_xml_bytes(input.as_bytes(), None, &ParseOptions::default())
            .unwrap();
        assert_eq!(doc.to_xml_string(None, "  ").unwrap(), input);
    }
}

mod recovery {
    use super::*;
    use pretty_assertions::assert_eq;
    use xml_tabular::Error;

    #[test]
    fn test_malformed_document_fails_without_recovery() {
        let model = manifest_model();
        let err = model
            .parse_xml_bytes(
                b"<manifest><created>x</wrong></manifest>",
                None,
                &ParseOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
    }

    #[test]
    fn test_recovery_salvages_mismatched_tags() {
        let model = manifest_model();
        let options = ParseOptions {
            recover: true,
            ..Default::default()
        };
        let doc = model
            .parse_xml_bytes(b"<manifest><created>x</wrong></manifest>", None, &options)
            .unwrap();
        let record = &doc.data.tables["manifest"].records[0];
        assert_eq!(
            record["created"],
            xml_tabular::Value::Str("x".to_string())
        );
    }

    #[test]
    fn test_recovery_closes_elements_at_eof() {
        let model = manifest_model();
        let options = ParseOptions {
            recover: true,
            ..Default::default()
        };
        let doc = model
            .parse_xml_bytes(b"<manifest><created>x</created>", None, &options)
            .unwrap();
        assert_eq!(doc.data.tables["manifest"].records.len(), 1);
    }

    #[test]
    fn test_recovery_still_fails_on_garbage() {
        let model = manifest_model();
        let options = ParseOptions {
            recover: true,
            ..Default::default()
        };
        for iterparse in [true, false] {
            let err = model
                .parse_xml_bytes(
                    b"this is not xml at all",
                    None,
                    &ParseOptions {
                        iterparse,
                        ..options.clone()
                    },
                )
                .unwrap_err();
            assert!(matches!(err, Error::MalformedInput(_)));
        }
    }
}

mod validation {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::rc::Rc;
    use xml_tabular::{DocumentValidator, Error};

    #[test]
    fn test_default_validator_rejects_malformed_input() {
        let model = manifest_model();
        let options = ParseOptions {
            skip_validation: false,
            ..Default::default()
        };
        let err = model
            .parse_xml_bytes(b"<manifest><created>x</wrong></manifest>", None, &options)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_custom_validator_runs_before_transcoding() {
        struct RejectAll;
        impl DocumentValidator for RejectAll {
            fn validate(&self, _xml: &[u8]) -> xml_tabular::Result<()> {
                Err(Error::Validation("document rejected".to_string()))
            }
        }

        let mut config = ModelConfig::default();
        config.validator = Some(Rc::new(RejectAll));
        let model = DataModel::from_xsd_str(MANIFEST_XSD, Some("manifest"), config).unwrap();
        let options = ParseOptions {
            skip_validation: false,
            ..Default::default()
        };
        let err = model
            .parse_xml_bytes(MANIFEST_DOC.as_bytes(), None, &options)
            .unwrap_err();
        assert!(err.to_string().contains("document rejected"));

        // validation skipped by default
        model
            .parse_xml_bytes(MANIFEST_DOC.as_bytes(), None, &ParseOptions::default())
            .unwrap();
    }
}
