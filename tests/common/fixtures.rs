#![allow(dead_code)]

/// Processed-format profile: two threads in one process
pub fn basic_profile() -> String {
    r#"{
  "meta": { "product": "Firefox", "interval": 1.0, "startTime": 1700000000000 },
  "threads": [
    { "name": "GeckoMain", "processName": "Parent Process", "pid": "4242",
      "samples": { "length": 120 } },
    { "name": "Compositor", "processName": "Parent Process", "pid": "4242",
      "samples": { "length": 30 } }
  ]
}"#
    .to_string()
}

/// Gecko-format profile with a child process nested under `processes`
pub fn gecko_profile(product: &str) -> String {
    format!(
        r#"{{
  "meta": {{ "product": "{product}", "interval": 2.0 }},
  "threads": [
    {{ "name": "GeckoMain", "processName": "Parent Process", "pid": 1,
       "samples": {{ "data": [[0, 1], [1, 2]] }} }}
  ],
  "processes": [
    {{ "threads": [
      {{ "name": "GeckoMain", "processName": "Web Content", "pid": 2,
         "samples": {{ "data": [[0, 1]] }} }}
    ] }}
  ]
}}"#
    )
}

pub fn malformed_profile() -> String {
    "{ this is not json".to_string()
}
