pub fn render_schema() -> String {
	expand_includes(include_str!("../../../sql/init.sql"))
}

fn expand_includes(sql: &str) -> String {
	let mut out = String::new();

	for line in sql.lines() {
		let trimmed = line.trim();

		if let Some(path) = trimmed.strip_prefix("\\ir ") {
			match path.trim() {
				"tables/001_organizations.sql" =>
					out.push_str(include_str!("../../../sql/tables/001_organizations.sql")),
				"tables/002_organization_members.sql" =>
					out.push_str(include_str!("../../../sql/tables/002_organization_members.sql")),
				"tables/003_organization_credentials.sql" => out
					.push_str(include_str!("../../../sql/tables/003_organization_credentials.sql")),
				"tables/004_campaigns.sql" =>
					out.push_str(include_str!("../../../sql/tables/004_campaigns.sql")),
				"tables/005_calls.sql" =>
					out.push_str(include_str!("../../../sql/tables/005_calls.sql")),
				_ => out.push_str(line),
			}
		} else {
			out.push_str(line);
		}

		out.push('\n');
	}

	out
}
