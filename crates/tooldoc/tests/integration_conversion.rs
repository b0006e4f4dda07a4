use anyhow::Context as _;
use serde_json::{Value, json};
use unrelated_tooldoc::config::FailurePolicy;
use unrelated_tooldoc::{ConversionConfig, OutputDocument, convert_document};

const PETSTORE_V2: &str = include_str!("fixtures/petstore-v2.yaml");
const TREE_V31: &str = include_str!("fixtures/tree-v31.json");

fn convert(source: &str) -> anyhow::Result<(OutputDocument, Value)> {
    let run = convert_document(source, &ConversionConfig::default());
    let doc = run.into_document().context("conversion failed")?;
    let json = serde_json::to_value(&doc).context("serialize output")?;
    Ok((doc, json))
}

fn count_refs(v: &Value) -> usize {
    match v {
        Value::Object(m) => {
            usize::from(m.contains_key("$ref")) + m.values().map(count_refs).sum::<usize>()
        }
        Value::Array(a) => a.iter().map(count_refs).sum(),
        _ => 0,
    }
}

#[test]
fn swagger2_petstore_converts() -> anyhow::Result<()> {
    let run = convert_document(PETSTORE_V2, &ConversionConfig::default());
    assert!(run.success, "{:?}", run.diagnostics.error);
    assert_eq!(run.diagnostics.source_version.as_deref(), Some("2.0"));
    assert!(run.diagnostics.failures.is_empty());

    let doc = run.document.context("document")?;
    let out = serde_json::to_value(&doc)?;

    assert_eq!(
        out["metadata"],
        json!({"title": "Swagger Petstore", "description": "A sample pet store", "version": "1.0.7"})
    );

    let names: Vec<&str> = doc.tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(
        names,
        [
            "addPet",
            "findPetsByStatus",
            "getPetById",
            "deletePet",
            "updatePetWithForm"
        ]
    );

    let add = &out["tools"][0];
    assert_eq!(add["description"], "Add a new pet to the store");
    assert_eq!(add["http"], json!({"method": "POST", "path": "/pet"}));
    assert_eq!(add["parameters"]["required"], json!(["body"]));
    let body = &add["parameters"]["properties"]["body"];
    assert_eq!(body["required"], json!(["name", "photoUrls"]));
    assert_eq!(body["properties"]["category"]["properties"]["name"]["type"], "string");
    assert_eq!(body["properties"]["status"]["nullable"], true);
    assert_eq!(count_refs(body), 0);

    let find = &out["tools"][1];
    assert_eq!(
        find["parameters"]["properties"]["status"],
        json!({
            "type": "array",
            "items": {"type": "string", "enum": ["available", "pending", "sold"]}
        })
    );
    assert!(find["parameters"]["properties"].get("api_key").is_none());
    assert_eq!(find["annotations"]["readOnlyHint"], true);

    let get = &out["tools"][2];
    assert_eq!(get["description"], "Returns a single pet");
    assert_eq!(
        get["parameters"]["properties"]["petId"],
        json!({"type": "integer", "format": "int64"})
    );

    let delete = &out["tools"][3];
    assert_eq!(delete["deprecated"], true);
    assert_eq!(delete["annotations"]["destructiveHint"], true);
    assert!(out["tools"][2].get("deprecated").is_none());

    let form = &out["tools"][4];
    assert_eq!(form["parameters"]["required"], json!(["petId"]));
    assert!(form["parameters"]["properties"].get("body").is_none());

    let schemas: Vec<&String> = out["schemas"].as_object().context("schemas")?.keys().collect();
    assert_eq!(schemas, ["Category", "Tag", "Pet"]);
    Ok(())
}

#[test]
fn openapi31_tree_converts_with_cycles_and_compositions() -> anyhow::Result<()> {
    let (doc, out) = convert(TREE_V31)?;

    let tree = &out["schemas"]["TreeNode"];
    assert_eq!(tree["properties"]["label"], json!({"type": "string", "nullable": true}));
    assert_eq!(tree["properties"]["parent"], json!({"$ref": "#/schemas/TreeNode"}));
    assert_eq!(
        tree["properties"]["children"]["items"],
        json!({"$ref": "#/schemas/TreeNode"})
    );
    assert_eq!(count_refs(tree), 2);

    let shape = &out["schemas"]["Shape"];
    assert_eq!(shape["oneOf"].as_array().map(Vec::len), Some(2));
    assert_eq!(shape["oneOf"][0]["properties"]["radius"]["type"], "number");
    assert_eq!(
        shape["discriminator"]["mapping"]["circle"],
        "#/components/schemas/Circle"
    );

    let maybe = &out["schemas"]["MaybeCircle"];
    assert_eq!(maybe["type"], "object");
    assert_eq!(maybe["nullable"], true);
    assert!(maybe.get("anyOf").is_none());

    assert_eq!(
        out["schemas"]["Broken"]["error"]["kind"],
        "unresolvableReference"
    );
    assert_eq!(out["schemas"]["Broken"]["error"]["reference"], "DoesNotExist");

    let list = doc.tool("getNodesByNodeIdChildren").context("list tool")?;
    assert_eq!(list.description, "List children");
    assert_eq!(list.required(), ["nodeId".to_string()]);
    let params = serde_json::to_value(&list.parameters)?;
    assert_eq!(
        params["properties"]["depth"],
        json!({"type": "integer", "nullable": true, "minimum": 1})
    );

    let replace = doc.tool("putNodesByNodeIdChildren").context("put tool")?;
    let params = serde_json::to_value(&replace.parameters)?;
    let body = &params["properties"]["body"];
    assert_eq!(body["description"], "replacement node");
    assert_eq!(body["properties"]["parent"], json!({"$ref": "#/schemas/TreeNode"}));
    assert_eq!(replace.required(), ["body".to_string()]);
    assert_eq!(replace.annotations.idempotent_hint, Some(true));
    Ok(())
}

#[test]
fn reference_chain_has_no_stubs_and_self_reference_has_one() -> anyhow::Result<()> {
    let (_, out) = convert(
        r"
openapi: 3.0.0
info: { title: t, version: '1' }
paths: {}
components:
  schemas:
    A:
      $ref: '#/components/schemas/B'
    B:
      $ref: '#/components/schemas/C'
    C:
      type: object
      properties:
        value: { type: string }
    Self:
      type: object
      properties:
        me:
          $ref: '#/components/schemas/Self'
",
    )?;
    assert_eq!(count_refs(&out["schemas"]["A"]), 0);
    assert_eq!(out["schemas"]["A"]["properties"]["value"]["type"], "string");

    assert_eq!(count_refs(&out["schemas"]["Self"]), 1);
    assert_eq!(
        out["schemas"]["Self"]["properties"]["me"],
        json!({"$ref": "#/schemas/Self"})
    );
    Ok(())
}

#[test]
fn long_alias_chain_is_bounded_without_overflow() -> anyhow::Result<()> {
    const LINKS: usize = 3000;
    let mut schemas = serde_json::Map::new();
    for i in 0..LINKS {
        schemas.insert(
            format!("A{i}"),
            json!({"$ref": format!("#/components/schemas/A{}", i + 1)}),
        );
    }
    schemas.insert(format!("A{LINKS}"), json!({"type": "string"}));
    let source = serde_json::to_string(&json!({
        "openapi": "3.0.3",
        "info": {"title": "chain", "version": "1"},
        "paths": {},
        "components": {"schemas": schemas}
    }))?;

    let config = ConversionConfig::default();
    let limit = config.limits.max_reference_depth;
    let run = convert_document(&source, &config);
    assert!(run.success, "{:?}", run.diagnostics.error);
    let doc = run.document.context("document")?;
    let out = serde_json::to_value(&doc)?;

    assert_eq!(out["schemas"]["A0"]["error"]["kind"], "referenceTooDeep");
    let near_tail = format!("A{}", LINKS + 1 - limit);
    assert_eq!(out["schemas"][near_tail.as_str()], json!({"type": "string"}));
    let past_limit = format!("A{}", LINKS - limit);
    assert_eq!(
        out["schemas"][past_limit.as_str()]["error"]["kind"],
        "referenceTooDeep"
    );
    Ok(())
}

#[test]
fn nullable_forms_serialize_identically() -> anyhow::Result<()> {
    let v31 = r#"{"openapi": "3.1.0", "components": {"schemas": {
        "N": {"type": ["string", "null"], "format": "date-time"}
    }}}"#;
    let v30 = r#"{"openapi": "3.0.3", "components": {"schemas": {
        "N": {"format": "date-time", "nullable": true, "type": "string"}
    }}}"#;

    let (a, _) = convert(v31)?;
    let (b, _) = convert(v30)?;
    let a = serde_json::to_string(a.schema("N").context("N in 3.1")?)?;
    let b = serde_json::to_string(b.schema("N").context("N in 3.0")?)?;
    assert_eq!(a, b);
    assert_eq!(a, r#"{"type":"string","format":"date-time","nullable":true}"#);
    Ok(())
}

#[test]
fn discriminator_without_mapping_is_kept_without_mapping() -> anyhow::Result<()> {
    let (_, out) = convert(
        r"
openapi: 3.0.0
components:
  schemas:
    Pet:
      oneOf:
        - $ref: '#/components/schemas/Cat'
        - $ref: '#/components/schemas/Dog'
      discriminator:
        propertyName: petType
    Cat: { type: object, properties: { petType: { type: string } } }
    Dog: { type: object, properties: { petType: { type: string } } }
",
    )?;
    let pet = &out["schemas"]["Pet"];
    assert_eq!(pet["oneOf"].as_array().map(Vec::len), Some(2));
    assert_eq!(pet["discriminator"], json!({"propertyName": "petType"}));
    Ok(())
}

#[test]
fn reference_sibling_description_fills_only_when_absent() -> anyhow::Result<()> {
    let (_, out) = convert(
        r"
openapi: 3.1.0
components:
  schemas:
    Base:
      type: object
      properties:
        id: { type: string }
    Described:
      type: object
      description: has its own
      properties:
        id: { type: string }
    UsesBase:
      $ref: '#/components/schemas/Base'
      description: from sibling
    UsesDescribed:
      $ref: '#/components/schemas/Described'
      description: from sibling
",
    )?;
    assert_eq!(out["schemas"]["UsesBase"]["description"], "from sibling");
    assert_eq!(out["schemas"]["UsesBase"]["properties"]["id"]["type"], "string");
    assert!(out["schemas"]["UsesBase"].get("allOf").is_none());
    assert_eq!(out["schemas"]["UsesDescribed"]["description"], "has its own");
    Ok(())
}

#[test]
fn operation_failures_are_isolated_or_abort() -> anyhow::Result<()> {
    let source = r"
openapi: 3.0.0
paths:
  /ok:
    get:
      operationId: ok
      responses: { '200': { description: ok } }
  /bad:
    post:
      operationId: bad
      requestBody:
        $ref: '#/components/requestBodies/Missing'
      responses: { '200': { description: ok } }
";
    let run = convert_document(source, &ConversionConfig::default());
    assert!(run.success);
    assert_eq!(run.diagnostics.failures.len(), 1);
    assert_eq!(run.diagnostics.failures[0].method, "POST");
    let doc = run.document.context("document")?;
    assert_eq!(doc.tools.len(), 1);

    let config = ConversionConfig {
        failure_policy: FailurePolicy::Abort,
        ..ConversionConfig::default()
    };
    let run = convert_document(source, &config);
    assert!(!run.success);
    let error = run.diagnostics.error.context("error message")?;
    assert!(error.contains("POST /bad"), "{error}");
    Ok(())
}

#[test]
fn diagnostics_serialize_as_trace() -> anyhow::Result<()> {
    let run = convert_document(TREE_V31, &ConversionConfig::default());
    let trace = serde_json::to_value(&run.diagnostics)?;
    assert_eq!(trace["sourceVersion"], "3.1");
    assert!(
        trace["sourceHash"]
            .as_str()
            .is_some_and(|h| h.starts_with("sha256:"))
    );
    assert!(trace["steps"].as_array().is_some_and(|s| !s.is_empty()));
    assert!(trace["totalMs"].as_f64().is_some());
    assert!(trace.get("error").is_none());
    // `Broken` is reported.
    assert!(
        run.diagnostics
            .warnings
            .iter()
            .any(|w| w.location == "/schemas/Broken")
    );
    Ok(())
}
