//! The job catalog. Each entry is plain configuration over the shared pipeline;
//! `all` runs them in catalog order, staging jobs first.
use serde_json::{json, Value};

use crate::backend::{ConflictPolicy, Filter, Row};
use crate::pipeline::job::{
    DedupSpec, JobSpec, OverlayMode, OverlaySpec, RelatedSpec, ScanSpec, Side, TransferField,
    WriteSpec,
};
use crate::pipeline::mapping::FieldMapping;

pub const PROFILE_COLUMNS: &[&str] = &[
    "id",
    "first_name",
    "last_name",
    "email",
    "phone",
    "avatar_url",
    "role",
    "job_title",
    "primary_skill",
    "years_of_experience",
    "english_level",
    "bio",
    "expected_salary",
    "preferred_location",
    "work_preference",
    "notice_period",
    "resume_url",
    "onboarding_completed",
    "resume_data",
    "work_experience",
    "education_details",
    "license_details",
    "english_test_completed",
    "coding_test_completed",
    "final_interview_completed",
    "description",
    "ai_description",
    "talent_profile_completed",
    "skills",
    "social_media",
    "preferred_timezones",
    "preferred_locations",
    "work_preferences",
    "level",
    "country",
    "project_detail",
    "why_create_account",
    "company_preferences",
    "interview_attempt_count",
];

pub const COMPANY_COLUMNS: &[&str] = &[
    "id",
    "name",
    "description",
    "logo_url",
    "industry",
    "country",
    "website",
    "referral_source",
    "created_at",
    "updated_at",
    "created_by",
    "tech_stack",
    "office_locations",
    "benefits",
    "workplace_culture",
    "profile_bio",
    "technology_stack",
    "first_job_created",
    "company_profile_completed",
    "social_media",
    "timezones",
];

pub const MEMBER_COLUMNS: &[&str] = &[
    "id",
    "company_id",
    "user_id",
    "role",
    "created_at",
    "first_name",
    "last_name",
    "phone",
    "location",
    "terms_accepted",
    "is_subscribed",
    "avatar_url",
    "updated_at",
    "email",
];

pub const JOB_COLUMNS: &[&str] = &[
    "id",
    "company_id",
    "title",
    "description",
    "requirements",
    "skills",
    "salary_range",
    "location",
    "type",
    "status",
    "created_at",
    "updated_at",
    "primary_skill",
    "english_proficiency",
    "years_experience",
    "start_date",
    "working_hours",
    "what_you_expect",
    "what_you_get",
    "annual_take_home",
    "end_date",
    "roles",
    "location_type",
    "what_candidate_get",
    "annual_take_home_range",
    "job_location",
    "description_link",
    "currency",
];

pub const ONBOARDING_COLUMNS: &[&str] = &[
    "id",
    "email",
    "first_name",
    "last_name",
    "linkedin_url",
    "type",
    "status",
    "company_name",
    "created_at",
    "updated_at",
    "onboarding_completed",
    "verification_url",
];

pub const AVAILABILITY_COLUMNS: &[&str] =
    &["profile_id", "timeslots", "created_at", "updated_at", "timezone"];

pub const INTERVIEW_RESULT_COLUMNS: &[&str] = &[
    "id",
    "user_id",
    "technical_assessment",
    "strengths",
    "areas_for_improvement",
    "final_score",
    "recommendation",
    "interview_date",
    "primary_skill",
    "job_title",
    "created_at",
    "assessment_id",
];

pub const STAGED_AUDIO_COLUMNS: &[&str] = &["id", "wav_file_url", "user_id"];

/// `(title, pipeline_status)` of the boards every job starts with, in display order.
pub const DEFAULT_BOARDS: &[(&str, &str)] = &[
    ("SHORTLISTED", "shortlisted"),
    ("AI INTERVIEW ASSIGNED", "ai_interview_assigned"),
    ("AI INTERVIEW COMPLETED", "ai_interview_completed"),
    ("AI INTERVIEW EXPIRED", "ai_interview_expired"),
    ("HUMAN INTERVIEW ASSIGNED", "human_interview_assigned"),
    ("HUMAN INTERVIEW COMPLETED", "human_interview_completed"),
    ("OFFER DISCUSSION", "offer_discussion"),
    ("HIRED", "hired"),
    ("REJECTED", "rejected"),
];

fn source_scan(table: &'static str, columns: &'static [&'static str], filters: Vec<Filter>) -> ScanSpec {
    ScanSpec {
        side: Side::Source,
        table,
        columns,
        key: "id",
        filters,
    }
}

fn destination_scan(table: &'static str, columns: &'static [&'static str]) -> ScanSpec {
    ScanSpec {
        side: Side::Destination,
        table,
        columns,
        key: "id",
        filters: Vec::new(),
    }
}

fn write_to(table: &'static str, conflict_key: &'static str, policy: ConflictPolicy) -> WriteSpec {
    WriteSpec {
        table,
        conflict_key,
        policy,
        only_transferred: false,
        require_fields: &[],
    }
}

fn staged_write(table: &'static str, conflict_key: &'static str) -> WriteSpec {
    WriteSpec {
        only_transferred: true,
        ..write_to(table, conflict_key, ConflictPolicy::Overwrite)
    }
}

fn copy_job(name: &'static str, description: &'static str, scan: ScanSpec, write: WriteSpec) -> JobSpec {
    JobSpec {
        name,
        description,
        scan,
        related: None,
        dedup: None,
        overlay: None,
        transfers: Vec::new(),
        mapping: FieldMapping::new(),
        expand: None,
        write,
    }
}

fn country(country: &str) -> Vec<Filter> {
    vec![Filter::eq("country", country)]
}

pub fn profile_storage(country_filter: &str) -> JobSpec {
    JobSpec {
        dedup: Some(DedupSpec {
            table: "stagedbuckets",
            key_column: "user_id",
            fields: &["resume_url", "avatar_url"],
        }),
        transfers: vec![
            TransferField::object("resume_url"),
            TransferField {
                field: "avatar_url",
                normalize: true,
                inline_bucket: Some("avatars"),
                inline_stem: "avatar",
            },
        ],
        mapping: FieldMapping::new()
            .rename("id", "user_id")
            .keep(&["user_id", "resume_url", "avatar_url"]),
        ..copy_job(
            "profile-storage",
            "copy resumes and avatars, stage their new URLs",
            source_scan(
                "profiles",
                &["id", "email", "resume_url", "avatar_url"],
                country(country_filter),
            ),
            staged_write("stagedbuckets", "user_id"),
        )
    }
}

pub fn company_logos() -> JobSpec {
    JobSpec {
        dedup: Some(DedupSpec {
            table: "staged_companylogo",
            key_column: "id",
            fields: &["logo_url"],
        }),
        transfers: vec![TransferField::object("logo_url")],
        mapping: FieldMapping::new().keep(&["id", "logo_url"]),
        ..copy_job(
            "company-logos",
            "copy company logos, stage their new URLs",
            source_scan("companies", &["id", "logo_url"], Vec::new()),
            staged_write("staged_companylogo", "id"),
        )
    }
}

pub fn interview_audio(country_filter: &str) -> JobSpec {
    JobSpec {
        related: Some(RelatedSpec {
            side: Side::Source,
            table: "interviews",
            columns: STAGED_AUDIO_COLUMNS,
            match_column: "user_id",
            key: "id",
        }),
        dedup: Some(DedupSpec {
            table: "stagedaudio",
            key_column: "id",
            fields: &["wav_file_url"],
        }),
        transfers: vec![TransferField::object("wav_file_url")],
        mapping: FieldMapping::new().keep(STAGED_AUDIO_COLUMNS),
        ..copy_job(
            "interview-audio",
            "copy interview recordings of filtered profiles, stage their new URLs",
            source_scan("profiles", &["id"], country(country_filter)),
            staged_write("stagedaudio", "id"),
        )
    }
}

pub fn profiles(country_filter: &str) -> JobSpec {
    JobSpec {
        overlay: Some(OverlaySpec {
            side: Side::Destination,
            table: "stagedbuckets",
            key_column: "user_id",
            fields: &["resume_url", "avatar_url"],
            mode: OverlayMode::WhenPresent,
        }),
        ..copy_job(
            "profiles",
            "copy profiles with staged storage URLs",
            source_scan("profiles", PROFILE_COLUMNS, country(country_filter)),
            write_to("profiles", "id", ConflictPolicy::Overwrite),
        )
    }
}

pub fn companies() -> JobSpec {
    JobSpec {
        overlay: Some(OverlaySpec {
            side: Side::Destination,
            table: "staged_companylogo",
            key_column: "id",
            fields: &["logo_url"],
            mode: OverlayMode::WhenNonEmpty,
        }),
        ..copy_job(
            "companies",
            "copy companies with staged logo URLs",
            source_scan("companies", COMPANY_COLUMNS, Vec::new()),
            write_to("companies", "id", ConflictPolicy::Overwrite),
        )
    }
}

pub fn company_members() -> JobSpec {
    JobSpec {
        mapping: FieldMapping::new().force("avatar_url", Value::Null),
        ..copy_job(
            "company-members",
            "copy company members without avatars",
            source_scan("company_members", MEMBER_COLUMNS, Vec::new()),
            write_to("company_members", "id", ConflictPolicy::Overwrite),
        )
    }
}

pub fn jobs() -> JobSpec {
    copy_job(
        "jobs",
        "copy job postings",
        source_scan("jobs", JOB_COLUMNS, Vec::new()),
        write_to("jobs", "id", ConflictPolicy::Overwrite),
    )
}

pub fn onboarding_requests() -> JobSpec {
    copy_job(
        "onboarding-requests",
        "copy company onboarding requests",
        source_scan(
            "onboarding_requests",
            ONBOARDING_COLUMNS,
            vec![Filter::eq("type", "company")],
        ),
        write_to("onboarding_requests", "id", ConflictPolicy::Overwrite),
    )
}

pub fn interviews() -> JobSpec {
    JobSpec {
        overlay: Some(OverlaySpec {
            side: Side::Source,
            table: "interviews",
            key_column: "id",
            fields: &["transcribed_data"],
            mode: OverlayMode::Always,
        }),
        mapping: FieldMapping::new()
            .blank_to_null("wav_file_url")
            .blank_to_null("user_id")
            .default_value("wav_file_url", Value::Null)
            .default_value("user_id", Value::Null),
        ..copy_job(
            "interviews",
            "build interviews from staged audio plus source transcriptions",
            destination_scan("stagedaudio", STAGED_AUDIO_COLUMNS),
            write_to("interviews", "id", ConflictPolicy::Overwrite),
        )
    }
}

pub fn profile_availabilities() -> JobSpec {
    JobSpec {
        related: Some(RelatedSpec {
            side: Side::Source,
            table: "profile_availabilities",
            columns: AVAILABILITY_COLUMNS,
            match_column: "profile_id",
            key: "profile_id",
        }),
        ..copy_job(
            "profile-availabilities",
            "copy availabilities of migrated profiles",
            destination_scan("profiles", &["id"]),
            write_to("profile_availabilities", "profile_id", ConflictPolicy::IgnoreDuplicates),
        )
    }
}

pub fn interview_results() -> JobSpec {
    JobSpec {
        related: Some(RelatedSpec {
            side: Side::Source,
            table: "interview_results",
            columns: INTERVIEW_RESULT_COLUMNS,
            match_column: "user_id",
            key: "id",
        }),
        ..copy_job(
            "interview-results",
            "copy interview results of migrated profiles",
            destination_scan("profiles", &["id"]),
            write_to("interview_results", "id", ConflictPolicy::IgnoreDuplicates),
        )
    }
}

pub fn profile_created_at() -> JobSpec {
    JobSpec {
        overlay: Some(OverlaySpec {
            side: Side::Source,
            table: "profiles",
            key_column: "id",
            fields: &["created_at"],
            mode: OverlayMode::WhenPresent,
        }),
        write: WriteSpec {
            require_fields: &["created_at"],
            ..write_to("profiles", "id", ConflictPolicy::Overwrite)
        },
        ..copy_job(
            "profile-created-at",
            "restore original profile creation timestamps",
            destination_scan("profiles", &["id"]),
            write_to("profiles", "id", ConflictPolicy::Overwrite),
        )
    }
}

/// The nine default pipeline boards of one job; none without a company.
pub fn default_boards(job: &Row) -> Vec<Row> {
    let (Some(job_id), Some(company_id)) = (
        job.get("id").filter(|v| !v.is_null()),
        job.get("company_id").filter(|v| !v.is_null()),
    ) else {
        return Vec::new();
    };
    DEFAULT_BOARDS
        .iter()
        .enumerate()
        .filter_map(|(order, (title, status))| {
            match json!({
                "company_id": company_id,
                "job_id": job_id,
                "title": title,
                "pipeline_status": status,
                "display_order": order,
            }) {
                Value::Object(row) => Some(row),
                _ => None,
            }
        })
        .collect()
}

pub fn company_boards() -> JobSpec {
    JobSpec {
        dedup: Some(DedupSpec {
            table: "company_boards",
            key_column: "job_id",
            fields: &[],
        }),
        expand: Some(default_boards),
        ..copy_job(
            "company-boards",
            "create default pipeline boards for jobs that have none",
            destination_scan("jobs", &["id", "company_id"]),
            write_to("company_boards", "job_id,pipeline_status", ConflictPolicy::Insert),
        )
    }
}

pub const JOB_NAMES: &[&str] = &[
    "profile-storage",
    "company-logos",
    "interview-audio",
    "profiles",
    "companies",
    "company-members",
    "jobs",
    "onboarding-requests",
    "interviews",
    "profile-availabilities",
    "interview-results",
    "profile-created-at",
    "company-boards",
];

/// Every job in run order.
pub fn catalog(country_filter: &str) -> Vec<JobSpec> {
    vec![
        profile_storage(country_filter),
        company_logos(),
        interview_audio(country_filter),
        profiles(country_filter),
        companies(),
        company_members(),
        jobs(),
        onboarding_requests(),
        interviews(),
        profile_availabilities(),
        interview_results(),
        profile_created_at(),
        company_boards(),
    ]
}

pub fn find(name: &str, country_filter: &str) -> Option<JobSpec> {
    catalog(country_filter).into_iter().find(|j| j.name == name)
}
