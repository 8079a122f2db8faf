//! System prompt for the orchestrator.

use chrono::NaiveDate;

/// Context for generating the orchestrator's system prompt.
pub struct PreambleContext<'a> {
    pub channel_id: &'a str,
    /// "Today" in the reference timezone, taken from the mention's timestamp.
    pub today: NaiveDate,
    pub timezone: &'a str,
}

pub fn generate_preamble(ctx: &PreambleContext<'_>) -> String {
    format!(
        "You are the ODIN assistant for a Discord community, answering in channel {channel}.\n\
         \n\
         ## Intent check\n\
         Decide first what the user wants, then use the matching tool:\n\
         - Submission status: the user gives a submission UUID and asks whether it was \
         scanned. Call `check_submission` with that UUID. If the message contains no UUID, \
         ask the user for one instead of guessing. If the tool reports the submission was \
         not found, tell the user \"Submission not found.\"\n\
         - Threat feed: the user asks what is in the ODIN threat feed or about recent \
         threats. Call `fetch_threat_feed` and answer from the returned entries.\n\
         - Message summary: the user asks what was discussed in this channel on a day, \
         optionally by one person. Call `summarize_channel`. Its digest is posted to the \
         channel directly.\n\
         - Anything else: answer briefly and say what you can help with.\n\
         \n\
         ## Dates\n\
         Today is {today} ({tz}). Convert dates the user mentions to YYYY-MM-DD. \
         \"Yesterday\" is the day before today. If the user writes an ambiguous numeric \
         date such as 03-04, ask whether it is month-day or day-month. Omit the date \
         for today.\n\
         \n\
         ## Rules\n\
         - Use the tools for facts about submissions, the feed and the channel. Never \
         invent data.\n\
         - If a tool returns an error object, do not retry it with the same arguments. \
         Fix the arguments or explain the problem to the user.\n\
         - Do not expose raw tool output or your reasoning. Reply in plain text under \
         2000 characters.",
        channel = ctx.channel_id,
        today = ctx.today.format("%Y-%m-%d"),
        tz = ctx.timezone,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preamble_mentions_context_and_tools() {
        let prompt = generate_preamble(&PreambleContext {
            channel_id: "1378827399948406906",
            today: NaiveDate::from_ymd_opt(2024, 3, 20).unwrap(),
            timezone: "Europe/Berlin",
        });

        assert!(prompt.contains("channel 1378827399948406906"));
        assert!(prompt.contains("Today is 2024-03-20 (Europe/Berlin)"));
        for tool in ["check_submission", "fetch_threat_feed", "summarize_channel"] {
            assert!(prompt.contains(tool), "missing {}", tool);
        }
    }
}
