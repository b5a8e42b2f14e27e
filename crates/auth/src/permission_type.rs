//! Permission catalogue.
//!
//! Each permission owns a fixed bit position (its ordinal). Positions are
//! additive-only: once released, an ordinal keeps its meaning forever and
//! retired permissions leave a gap rather than being reused.

use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown permission '{0}'")]
pub struct UnknownPermission(pub String);

macro_rules! permission_catalogue {
    ($( $(#[$doc:meta])* $variant:ident = $ordinal:literal => $name:literal, )+) => {
        /// A permission bit in [`crate::PermissionFlags`].
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u16)]
        pub enum PermissionType {
            $( $(#[$doc])* $variant = $ordinal, )+
        }

        impl PermissionType {
            /// Every catalogued permission, in ordinal order.
            pub const ALL: &'static [PermissionType] = &[ $( PermissionType::$variant, )+ ];

            pub const fn ordinal(self) -> u16 {
                self as u16
            }

            pub fn from_ordinal(ordinal: u16) -> Option<Self> {
                match ordinal {
                    $( $ordinal => Some(Self::$variant), )+
                    _ => None,
                }
            }

            /// Stable snake_case name, used on the wire.
            pub const fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $name, )+
                }
            }
        }

        impl FromStr for PermissionType {
            type Err = UnknownPermission;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $name => Ok(Self::$variant), )+
                    other => Err(UnknownPermission(other.to_string())),
                }
            }
        }
    };
}

permission_catalogue! {
    // Content
    Read = 0 => "read",
    Edit = 1 => "edit",
    Delete = 2 => "delete",
    Publish = 3 => "publish",
    Review = 4 => "review",
    Comment = 5 => "comment",
    Vote = 6 => "vote",
    Analytics = 7 => "analytics",
    Create = 8 => "create",
    Share = 9 => "share",
    Export = 10 => "export",
    Import = 11 => "import",
    Archive = 12 => "archive",
    Restore = 13 => "restore",
    Moderate = 14 => "moderate",
    Pin = 15 => "pin",
    Feature = 16 => "feature",
    Report = 17 => "report",
    /// Edit the grants attached to a resource.
    ManagePermissions = 18 => "manage_permissions",
    TransferOwnership = 19 => "transfer_ownership",

    // Learning
    Enroll = 20 => "enroll",
    Unenroll = 21 => "unenroll",
    Grade = 22 => "grade",
    Submit = 23 => "submit",
    ViewSubmissions = 24 => "view_submissions",
    ManageEnrollments = 25 => "manage_enrollments",
    IssueCertificates = 26 => "issue_certificates",
    ViewProgress = 27 => "view_progress",
    Schedule = 28 => "schedule",
    Attend = 29 => "attend",
    HostSession = 30 => "host_session",
    RecordSession = 31 => "record_session",

    // Media and authoring
    Upload = 32 => "upload",
    Download = 33 => "download",
    ManageMedia = 34 => "manage_media",
    Tag = 35 => "tag",
    Categorize = 36 => "categorize",
    ManageTemplates = 37 => "manage_templates",
    Translate = 38 => "translate",
    ApproveTranslations = 39 => "approve_translations",

    // Community
    React = 40 => "react",
    Mention = 41 => "mention",
    Follow = 42 => "follow",
    Message = 43 => "message",
    ManageGroups = 44 => "manage_groups",
    Invite = 45 => "invite",
    Ban = 46 => "ban",
    Mute = 47 => "mute",
    LockThreads = 48 => "lock_threads",

    // Lifecycle
    ViewDrafts = 49 => "view_drafts",
    ScheduleRelease = 50 => "schedule_release",
    ManageVersions = 51 => "manage_versions",
    ViewHistory = 52 => "view_history",
    Rollback = 53 => "rollback",

    // Reporting and commerce
    ViewReports = 54 => "view_reports",
    ExportReports = 55 => "export_reports",
    ManageDashboards = 56 => "manage_dashboards",
    ViewRevenue = 57 => "view_revenue",
    ManagePricing = 58 => "manage_pricing",
    IssueRefunds = 59 => "issue_refunds",
    ManageCoupons = 60 => "manage_coupons",
    ViewOrders = 61 => "view_orders",
    ManageSubscriptions = 62 => "manage_subscriptions",
    ManageCatalog = 63 => "manage_catalog",

    // Tenant administration (second word)
    ManageTenant = 64 => "manage_tenant",
    ManageUsers = 65 => "manage_users",
    ManageRoles = 66 => "manage_roles",
    ManageBilling = 67 => "manage_billing",
    ManageIntegrations = 68 => "manage_integrations",
    ManageWebhooks = 69 => "manage_webhooks",
    ManageApiKeys = 70 => "manage_api_keys",
    ViewAuditLog = 71 => "view_audit_log",
    ImpersonateUsers = 72 => "impersonate_users",
    ManageDomains = 73 => "manage_domains",
    ManageBranding = 74 => "manage_branding",
    ManageRetention = 75 => "manage_retention",
}

impl core::fmt::Display for PermissionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PermissionType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PermissionType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}
