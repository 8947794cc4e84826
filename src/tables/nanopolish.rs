use std::fmt;

use crate::alignment::Strand;
use crate::RecordError;

const COLUMNS: usize = 11;

/// One row of a nanopolish `call-methylation` table.
///
/// Nanopolish groups CpG sites closer than its k-mer length and reports a
/// single likelihood for the whole group. Log-likelihood columns are kept
/// as text so the converted rows repeat them verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct NanopolishGroup {
    /// Reference contig name.
    pub chrom: String,
    /// Strand of the read.
    pub strand: Strand,
    /// 0-based position of the first CpG of the group.
    pub start: u64,
    /// Position of the last CpG of the group.
    pub end: u64,
    /// Read identifier.
    pub read_name: String,
    /// Log-likelihood ratio of methylated over unmethylated.
    pub log_ratio: String,
    /// Log-likelihood of the methylated model.
    pub log_methylated: String,
    /// Log-likelihood of the unmethylated model.
    pub log_unmethylated: String,
    /// Number of CpG sites in the group.
    pub num_motifs: usize,
    /// Reference context of the group.
    pub sequence: String,
}

impl NanopolishGroup {
    /// True for the column header line.
    pub fn is_header(line: &str) -> bool {
        line.starts_with("chromosome")
    }

    /// Parse a whitespace separated row.
    pub fn parse(line: &str) -> Result<Self, RecordError> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < COLUMNS {
            return Err(RecordError::parse(
                "nanopolish row",
                format!("expected {COLUMNS} fields, found {}", fields.len()),
            ));
        }
        let bad = |what: &str, value: &str| RecordError::parse("nanopolish row", format!("bad {what} '{value}'"));
        let coordinate = |value: &str| value.parse::<u64>().map_err(|_| bad("coordinate", value));
        if fields[5].parse::<f64>().is_err() {
            return Err(bad("log-likelihood ratio", fields[5]));
        }

        Ok(Self {
            chrom: fields[0].to_string(),
            strand: fields[1].parse().map_err(|_| bad("strand", fields[1]))?,
            start: coordinate(fields[2])?,
            end: coordinate(fields[3])?,
            read_name: fields[4].to_string(),
            log_ratio: fields[5].to_string(),
            log_methylated: fields[6].to_string(),
            log_unmethylated: fields[7].to_string(),
            num_motifs: fields[9]
                .parse()
                .map_err(|_| bad("motif count", fields[9]))?,
            sequence: fields[10].to_string(),
        })
    }

    /// One row per CpG site of the group.
    ///
    /// Site positions are the `CG` offsets in the context sequence, counted
    /// from the first one and added to the group start.
    pub fn sites(&self) -> Result<Vec<NanopolishSite<'_>>, RecordError> {
        let begins: Vec<u64> = if self.num_motifs == 1 {
            vec![self.start]
        } else {
            let offsets: Vec<u64> = self
                .sequence
                .match_indices("CG")
                .map(|(offset, _)| offset as u64)
                .collect();
            let Some(&first) = offsets.first() else {
                return Err(RecordError::parse(
                    "nanopolish row",
                    format!("no CpG in group sequence '{}'", self.sequence),
                ));
            };
            offsets.iter().map(|offset| self.start + offset - first).collect()
        };
        Ok(begins
            .into_iter()
            .map(|begin| NanopolishSite { group: self, begin })
            .collect())
    }
}

/// Single CpG site of a nanopolish group, rendered as a call table row
/// (`chr begin end read log_ratio strand log_meth log_unmeth`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NanopolishSite<'a> {
    group: &'a NanopolishGroup,
    /// 0-based position of the C.
    pub begin: u64,
}

impl NanopolishSite<'_> {
    /// Exclusive end, covering the dinucleotide.
    pub fn end(&self) -> u64 {
        self.begin + 2
    }
}

impl fmt::Display for NanopolishSite<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let g = self.group;
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            g.chrom,
            self.begin,
            self.end(),
            g.read_name,
            g.log_ratio,
            g.strand,
            g.log_methylated,
            g.log_unmethylated
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const GROUP: &str = "chr1\t+\t100\t103\tread1\t3.5\t-10.0\t-13.5\t1\t2\tAAAAACGTCGAAAAA";

    #[test]
    fn splits_groups_into_sites() {
        let group = NanopolishGroup::parse(GROUP).unwrap();
        let rows: Vec<String> = group.sites().unwrap().iter().map(ToString::to_string).collect();
        assert_eq!(
            rows,
            vec![
                "chr1\t100\t102\tread1\t3.5\t+\t-10.0\t-13.5",
                "chr1\t103\t105\tread1\t3.5\t+\t-10.0\t-13.5",
            ]
        );
    }

    #[test]
    fn single_site_uses_start() {
        let line = "chr2\t-\t50\t50\tread2\t-4.25\t-20.0\t-15.75\t1\t1\tGGGCGTTT";
        let group = NanopolishGroup::parse(line).unwrap();
        assert_eq!(group.strand, Strand::Reverse);
        let sites = group.sites().unwrap();
        assert_eq!(sites.len(), 1);
        assert_eq!((sites[0].begin, sites[0].end()), (50, 52));
    }

    #[test]
    fn recognises_header() {
        assert!(NanopolishGroup::is_header(
            "chromosome\tstrand\tstart\tend\tread_name\tlog_lik_ratio"
        ));
        assert!(!NanopolishGroup::is_header(GROUP));
    }

    #[test_case("chr1\t+\t100\t103\tread1\t3.5" ; "too few columns")]
    #[test_case("chr1\t*\t100\t103\tread1\t3.5\t-10.0\t-13.5\t1\t2\tACGCG" ; "bad strand")]
    #[test_case("chr1\t+\tx\t103\tread1\t3.5\t-10.0\t-13.5\t1\t2\tACGCG" ; "bad start")]
    #[test_case("chr1\t+\t100\t103\tread1\tnan?\t-10.0\t-13.5\t1\t2\tACGCG" ; "bad ratio")]
    fn rejects_malformed_rows(line: &str) {
        assert!(matches!(
            NanopolishGroup::parse(line),
            Err(RecordError::Parse { context: "nanopolish row", .. })
        ));
    }

    #[test]
    fn group_without_cpg_fails() {
        let line = "chr1\t+\t100\t103\tread1\t3.5\t-10.0\t-13.5\t1\t2\tAAAATTTT";
        let group = NanopolishGroup::parse(line).unwrap();
        assert!(group.sites().is_err());
    }
}
