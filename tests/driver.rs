mod support;

use assert_matches::assert_matches;
use serde_json::json;

use grein_loader::GreinClient;
use grein_loader::domain::{CountMode, DatasetId};
use grein_loader::error::{ErrorKind, GreinError};
use grein_loader::transport::CancelToken;

use support::{
    Script, ScriptedConnector, ack, config, decode_command, handshake_lines, message,
};

const DESCRIPTION: &str = r#"{"data":[
    ["Study link","<a href=\"https://www.ncbi.nlm.nih.gov/geo/query/acc.cgi?acc=GSE1\">GSE1</a>"],
    ["Number of samples",2],
    ["Species","Homo sapiens"],
    ["Title","Tumour RNA-seq"],
    ["Summary","character(0)"]
]}"#;

const METADATA: &str = r#"{"data":[
    ["Tumour 1","GSM1","tissue","age: 40","Homo sapiens","GPL1","polyA","NextSeq"],
    ["Tumour 2","GSM2","tissue","age: 52","Homo sapiens","GPL1","polyA","NextSeq"]
]}"#;

const COUNTS: &str = "\"\",\"GSM1\",\"GSM2\"\n\"TP53\",1,2\n\"BRCA1\",3,NA\n";

fn labels_frame() -> String {
    let table = "<table class=\"display\"><thead><tr>\
        <th>Sample title</th><th>GEO accession</th><th>Source</th><th>Characteristics</th>\
        <th>Organism</th><th>Platform</th><th>Library</th><th>Instrument</th>\
        </tr></thead></table>";
    message(&json!({ "values": { "metadata_full": { "html": table } } }).to_string())
}

fn dataset_script(normalized: bool) -> Script {
    let mut first = handshake_lines("sess42");
    first.push(message(r#"{"busy":"busy"}"#));

    let mut second = vec![ack(), "h".to_string(), ack(), ack()];
    if normalized {
        second.push(ack());
    }
    second.extend([labels_frame(), ack(), ack()]);

    Script {
        streams: vec![first, second],
        ..Script::default()
    }
    .respond("geo_summary", 200, DESCRIPTION)
    .respond("metadata_full", 200, METADATA)
    .respond("downloadcounts", 200, COUNTS)
}

fn client(script: Script) -> GreinClient<ScriptedConnector> {
    GreinClient::with_connector(ScriptedConnector::new(script), config()).unwrap()
}

fn nonce_of(url: &str) -> &str {
    url.split("nonce=").nth(1).unwrap()
}

#[test]
fn invalid_mode_fails_before_any_network_call() {
    let client = client(dataset_script(false));
    let err = client.fetch_dataset("GSE1", "raw").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_matches!(err, GreinError::InvalidMode(_));

    let log = client.connector().log();
    assert_eq!(log.connects, 0);
    assert!(log.sends.is_empty());
    assert!(log.requests.is_empty());
}

#[test]
fn fetch_raw_dataset() {
    let client = client(dataset_script(false));
    let record = client.fetch_dataset("GSE1", "RAW").unwrap();

    assert_eq!(record.mode, CountMode::Raw);
    let description = record.description.unwrap();
    assert_eq!(
        description.study_link,
        "https://www.ncbi.nlm.nih.gov/geo/query/acc.cgi?acc=GSE1"
    );
    assert_eq!(description.species, "Homo sapiens");
    assert_eq!(description.title, "Tumour RNA-seq");
    assert_eq!(description.summary, "");

    let metadata = record.metadata.unwrap();
    assert_eq!(metadata.labels.len(), 8);
    assert_eq!(metadata.len(), 2);
    let sample = metadata.get("GSM2").unwrap();
    assert_eq!(sample["Characteristics"], "age: 52");
    assert_eq!(sample["Sample title"], "Tumour 2");

    let counts = record.count_matrix.unwrap();
    assert_eq!(counts.header(), vec!["gene", "GSM1", "GSM2"]);
    assert_eq!(counts.value("TP53", "GSM2"), Some(2.0));
    assert!(counts.value("BRCA1", "GSM2").unwrap().is_nan());

    let log = client.connector().log();
    assert_eq!(log.connects, 1);
    assert_eq!(log.opens, 2);
    assert_eq!(log.sends.len(), 7);
    assert_eq!(log.sends[0], r#"["0#0|o|"]"#);
    assert_eq!(decode_command(&log.sends[1])["method"], "init");
    assert_eq!(decode_command(&log.sends[1])["data"]["gse"], "GSE1");
    assert_eq!(decode_command(&log.sends[5])["data"]["explore_tabs"], "Metadata");
    assert_eq!(decode_command(&log.sends[6])["data"]["count_type"], "raw");
}

#[test]
fn direct_requests_carry_session_headers_and_fresh_nonces() {
    let client = client(dataset_script(false));
    client.fetch_dataset("GSE1", "RAW").unwrap();

    let log = client.connector().log();
    assert_eq!(log.requests.len(), 3);
    let description = &log.requests[0];
    let metadata = &log.requests[1];
    let counts = &log.requests[2];

    assert!(description.url.starts_with(
        "http://grein.test/apps/grein/session/sess42/dataobj/geo_summary?w=&nonce="
    ));
    assert!(metadata.url.contains("/session/sess42/dataobj/metadata_full?w=&nonce="));
    assert_eq!(
        counts.url,
        "http://grein.test/apps/grein/session/sess42/download/downloadcounts?w="
    );
    assert_ne!(nonce_of(&description.url), nonce_of(&metadata.url));

    assert!(description.headers.contains(&("Origin", "http://grein.test".to_string())));
    assert!(description.headers.contains(&(
        "Referer",
        "http://grein.test/apps/grein/?gse=GSE1".to_string()
    )));

    // 8 labels -> descriptors 1..=3, sample count from the description
    let body = metadata.body.as_deref().unwrap();
    assert!(body.contains("columns%5B3%5D%5Bdata%5D=3"));
    assert!(!body.contains("columns%5B4%5D"));
    assert!(body.contains("length=2"));
}

#[test]
fn nonces_differ_between_fetches() {
    let client = client(dataset_script(false));
    client.fetch_dataset("GSE1", "RAW").unwrap();
    client.fetch_dataset("GSE1", "RAW").unwrap();

    let log = client.connector().log();
    assert_eq!(log.connects, 2);
    assert_ne!(nonce_of(&log.requests[0].url), nonce_of(&log.requests[3].url));
}

#[test]
fn normalized_mode_streams_normalized_dataset() {
    let client = client(dataset_script(true));
    let dataset: DatasetId = "GSE1".parse().unwrap();
    let record = client
        .fetch_dataset_with(&dataset, CountMode::Normalized)
        .unwrap();
    assert!(record.count_matrix.is_some());

    let log = client.connector().log();
    assert_eq!(log.sends.len(), 8);
    assert_eq!(decode_command(&log.sends[5])["data"]["normalized"], true);
    assert_eq!(decode_command(&log.sends[7])["data"]["count_type"], "normalized");
}

#[test]
fn server_error_marks_part_unavailable() {
    let script = dataset_script(false);
    let script = Script {
        responses: script
            .responses
            .into_iter()
            .filter(|(fragment, _)| fragment != "metadata_full")
            .collect(),
        ..script
    }
    .respond("metadata_full", 500, "Internal Server Error");
    let client = client(script);

    let record = client.fetch_dataset("GSE1", "RAW").unwrap();
    assert!(record.description.is_some());
    assert!(record.metadata.is_none());
    assert!(record.count_matrix.is_some());
}

#[test]
fn unavailable_description_falls_back_to_default_sample_count() {
    let script = dataset_script(false);
    let script = Script {
        responses: script
            .responses
            .into_iter()
            .filter(|(fragment, _)| fragment != "geo_summary")
            .collect(),
        ..script
    }
    .respond("geo_summary", 503, "");
    let client = client(script);

    let record = client.fetch_dataset("GSE1", "RAW").unwrap();
    assert!(record.description.is_none());
    let log = client.connector().log();
    assert!(log.requests[1].body.as_deref().unwrap().contains("length=100"));
}

#[test]
fn client_error_status_aborts_fetch() {
    let script = dataset_script(false);
    let script = Script {
        responses: script
            .responses
            .into_iter()
            .filter(|(fragment, _)| fragment != "downloadcounts")
            .collect(),
        ..script
    };
    let client = client(script);

    let err = client.fetch_dataset("GSE1", "RAW").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DataFetch);
    assert_eq!(err.step(), Some("count matrix request"));
    assert_matches!(err.root(), GreinError::DataStatus { status: 404, .. });
}

#[test]
fn missing_ack_reports_step() {
    let mut first = handshake_lines("sess42");
    first.push(message(r#"{"busy":"busy"}"#));
    let client = client(Script {
        streams: vec![first, vec!["h".to_string()]],
        ..Script::default()
    });

    let err = client.fetch_dataset("GSE1", "RAW").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(err.step(), Some("method update"));
    assert!(client.connector().log().requests.is_empty());
}

#[test]
fn cancelled_client_does_not_connect() {
    let cancel = CancelToken::new();
    let client = client(dataset_script(false)).with_cancel(cancel.clone());
    cancel.cancel();

    let err = client.fetch_dataset("GSE1", "RAW").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(client.connector().log().connects, 0);
}

fn overview_script(rows: usize) -> Script {
    let data = (0..rows)
        .map(|i| {
            json!([
                format!("<a href=\"?gse=GSE1000{i:02}\">GSE1000{i:02}</a> (Homo sapiens)"),
                10 + i,
                "Homo sapiens",
                format!("Title {i}"),
                format!("Summary {i}"),
            ])
        })
        .collect::<Vec<_>>();
    Script {
        streams: vec![{
            let mut lines = handshake_lines("ov1");
            lines.extend([ack(), ack()]);
            lines
        }],
        ..Script::default()
    }
    .respond(
        "dataobj/datatable",
        200,
        &json!({ "draw": 1, "data": data }).to_string(),
    )
}

#[test]
fn fetch_overview_returns_requested_entries() {
    let client = client(overview_script(10));
    let entries = client.fetch_overview(Some(10)).unwrap();

    assert_eq!(entries.len(), 10);
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.geo_accession, format!("GSE1000{i:02}"));
        assert_eq!(entry.sample_count, 10 + i as u64);
        assert_eq!(entry.species, "Homo sapiens");
        assert!(!entry.title.is_empty());
        assert!(!entry.summary.is_empty());
    }

    let log = client.connector().log();
    assert_eq!(log.sends.len(), 3);
    assert_eq!(decode_command(&log.sends[2])["data"]["tabs"], "Datasets");
    let request = &log.requests[0];
    assert!(request.url.contains("/session/ov1/dataobj/datatable?w=&nonce="));
    assert!(request.body.as_deref().unwrap().contains("length=10&"));
}

#[test]
fn fetch_overview_defaults_to_everything() {
    let client = client(overview_script(2));
    client.fetch_overview(None).unwrap();

    let log = client.connector().log();
    assert!(
        log.requests[0]
            .body
            .as_deref()
            .unwrap()
            .contains("length=1000000&")
    );
}

#[test]
fn overview_server_error_is_fatal() {
    let script = Script {
        responses: Vec::new(),
        ..overview_script(1)
    }
    .respond("dataobj/datatable", 500, "");
    let client = client(script);

    let err = client.fetch_overview(Some(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DataFetch);
}
