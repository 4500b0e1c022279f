//! AWS to GCP region name translation.
//!
//! Known regions go through a fixed table because the providers do not number
//! their regions the same way (`us-west-2` is `us-west1`). Anything else gets a
//! structural rewrite so every input produces some deterministic name.

/// Converts an AWS-style region (`us-east-1`) to the GCP naming scheme (`us-east1`).
pub fn to_gcp_region(aws_region: &str) -> String {
    match known_gcp_region(aws_region) {
        Some(region) => region.to_string(),
        None => convert_generic_region(aws_region),
    }
}

fn known_gcp_region(aws_region: &str) -> Option<&'static str> {
    let region = match aws_region {
        // US
        "us-east-1" => "us-east1",
        "us-east-2" => "us-east4",
        "us-west-1" => "us-west2",
        "us-west-2" => "us-west1",
        // GovCloud has no GCP counterpart, use the closest public region
        "us-gov-east-1" => "us-east1",
        "us-gov-west-1" => "us-west1",

        // Europe
        "eu-west-1" => "europe-west2",
        "eu-west-2" => "europe-west2",
        "eu-west-3" => "europe-west9",
        "eu-central-1" => "europe-west3",
        "eu-north-1" => "europe-north1",
        "eu-south-1" => "europe-southwest1",

        // Asia Pacific
        "ap-southeast-1" => "asia-southeast1",
        "ap-southeast-2" => "asia-southeast2",
        "ap-northeast-1" => "asia-northeast1",
        "ap-northeast-2" => "asia-northeast3",
        "ap-northeast-3" => "asia-northeast2",
        "ap-south-1" => "asia-south1",
        "ap-east-1" => "asia-east2",

        "ca-central-1" => "northamerica-northeast1",
        "sa-east-1" => "southamerica-east1",
        "af-south-1" => "africa-south1",
        "me-south-1" => "me-west1",

        _ => return None,
    };
    Some(region)
}

const PREFIX_REWRITES: &[(&str, &str)] = &[
    ("eu-", "europe-"),
    ("ap-", "asia-"),
    ("ca-", "northamerica-"),
    ("sa-", "southamerica-"),
];

fn convert_generic_region(aws_region: &str) -> String {
    let mut region = aws_region.to_string();

    for (aws_prefix, gcp_prefix) in PREFIX_REWRITES {
        if let Some(rest) = region.strip_prefix(aws_prefix) {
            region = format!("{gcp_prefix}{rest}");
            break;
        }
    }

    // "us-east-1" -> "us-east1"
    if region.split('-').count() >= 3
        && let Some(idx) = region.rfind('-')
    {
        region.remove(idx);
    }

    region
}
