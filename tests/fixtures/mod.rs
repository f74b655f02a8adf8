//! Sample document texts and scripted LLM replies.
#![allow(dead_code)]

pub const INVOICE_TEXT: &str = "\
ACME Corp
123 Industrial Way, Springfield

Invoice Number: INV-2024-001
Date: 2024-03-01
Bill To: Globex Industries, 42 Main Street

Description            Qty   Amount
Widget assembly          4   $1,000.00
Installation             1   $250.00

Total: $1,250.00
Payment due within 30 days.
";

pub const INVOICE_SCHEMA_REPLY: &str = r#"["Invoice Number", "Total"]"#;

pub const INVOICE_ROWS_REPLY: &str = r#"```json
[
  {"key": "Invoice Number", "value": "INV-2024-001", "comment": "Header, below the address"},
  {"key": "Total", "value": "$1,250.00", "comment": "Totals line at the bottom"}
]
```"#;

/// One field present, one absent, one under a differently worded label.
pub const ORDER_TEXT: &str = "\
Order Confirmation
Customer: Initech LLC
Order Date: 2024-03-28
Shipping Date: 2024-04-02
Notes: Leave at front desk.
";

pub const ORDER_SCHEMA_REPLY: &str = r#"["Customer", "Tracking Number", "Ship Date"]"#;

pub const ORDER_ROWS_REPLY: &str =
    r#"[{"key": "Customer", "value": "Initech LLC", "comment": "Second line"}]"#;

pub const RESUME_TEXT: &str = "\
JANE DOE
Email: jane.doe@example.com
Phone: +1 555 0100

EDUCATION
Undergraduate College
Indian Institute of Technology Delhi
B.Tech, 2015

SKILLS
- Rust
- Distributed systems
";

pub const RESUME_SCHEMA_REPLY: &str = r#"[
  {"name": "Full Name"},
  {"name": "Email", "description": "Contact email"},
  {"name": "Phone"},
  {"name": "Undergraduate College"},
  {"name": "Graduation Year"}
]"#;

/// Paraphrased phone, missing college, unparseable object for the year.
pub const RESUME_ROWS_REPLY: &str = r#"[
  {"key": "Full Name", "value": "JANE DOE", "comment": "Top of page"},
  {"key": "Email", "value": "jane.doe@example.com", "comment": "Contact block"},
  {"key": "Phone", "value": "+15550100", "comment": "Contact block"},
  {"key": "Graduation Year", "value": 2015}
]"#;
